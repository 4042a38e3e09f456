//! Parsing logic for persisted hardware error records, to be used in the standard environment.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{format, string::String, vec::Vec};

use r_efi::efi;
use scroll::Pread;

use crate::cper::{
    BOOT_ERROR_NOTIFICATION_GUID, CPER_HEADER_SIZE, CPER_SECTION_DESCRIPTOR_SIZE, CPER_SIGNATURE_END,
    CPER_SIGNATURE_START, CPER_VALID_PARTITION_ID, CPER_VALID_PLATFORM_ID, CPER_VALID_TIMESTAMP,
    TELEMETRY_SECTION_GUID, TELEMETRY_SECTION_SIZE, WHEA_CREATOR_GUID,
};

/// Decoded CPER common header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub revision: u16,
    pub section_count: u16,
    pub severity: u32,
    pub validation_bits: u32,
    pub record_length: u32,
    pub timestamp: [u8; 8],
    pub platform_id: efi::Guid,
    pub partition_id: efi::Guid,
    pub creator_id: efi::Guid,
    pub notification_type: efi::Guid,
    pub record_id: u64,
    pub flags: u32,
}

/// Decoded section descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptor {
    pub offset: u32,
    pub length: u32,
    pub revision: u16,
    pub flags: u32,
    pub section_type: efi::Guid,
    pub severity: u32,
}

/// Decoded telemetry section body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySection {
    pub component_id: efi::Guid,
    pub subcomponent_id: efi::Guid,
    pub error_status_value: u32,
    pub additional_info_1: u64,
    pub additional_info_2: u64,
}

fn read_guid(data: &[u8], offset: &mut usize) -> Result<efi::Guid, scroll::Error> {
    let bytes: &[u8] = data.gread_with(offset, 16)?;
    let mut guid = [0u8; 16];
    guid.copy_from_slice(bytes);
    Ok(efi::Guid::from_bytes(&guid))
}

/// Formats a GUID in registry format.
pub fn guid_str(guid: &efi::Guid) -> String {
    let b = guid.as_bytes();
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        u16::from_le_bytes([b[4], b[5]]),
        u16::from_le_bytes([b[6], b[7]]),
        b[8],
        b[9],
        b[10],
        b[11],
        b[12],
        b[13],
        b[14],
        b[15]
    )
}

fn severity_name(severity: u32) -> &'static str {
    match severity {
        0 => "Recoverable",
        1 => "Fatal",
        2 => "Corrected",
        3 => "Informational",
        _ => "Unknown",
    }
}

fn guid_name(guid: &efi::Guid) -> Option<&'static str> {
    match *guid {
        g if g == TELEMETRY_SECTION_GUID => Some("Telemetry"),
        g if g == BOOT_ERROR_NOTIFICATION_GUID => Some("Boot Error"),
        g if g == WHEA_CREATOR_GUID => Some("WHEA Report"),
        _ => None,
    }
}

fn decode_header(data: &[u8]) -> Result<RecordHeader, scroll::Error> {
    let le = scroll::LE;
    let offset = &mut 0;
    let signature: u32 = data.gread_with(offset, le)?;
    let revision = data.gread_with(offset, le)?;
    let signature_end: u32 = data.gread_with(offset, le)?;
    if signature != CPER_SIGNATURE_START || signature_end != CPER_SIGNATURE_END {
        return Err(scroll::Error::BadInput { size: *offset, msg: "bad signature" });
    }

    let section_count = data.gread_with(offset, le)?;
    let severity = data.gread_with(offset, le)?;
    let validation_bits = data.gread_with(offset, le)?;
    let record_length = data.gread_with(offset, le)?;
    let mut timestamp = [0u8; 8];
    timestamp.copy_from_slice(data.gread_with::<&[u8]>(offset, 8)?);
    let platform_id = read_guid(data, offset)?;
    let partition_id = read_guid(data, offset)?;
    let creator_id = read_guid(data, offset)?;
    let notification_type = read_guid(data, offset)?;
    let record_id = data.gread_with(offset, le)?;
    let flags = data.gread_with(offset, le)?;

    Ok(RecordHeader {
        revision,
        section_count,
        severity,
        validation_bits,
        record_length,
        timestamp,
        platform_id,
        partition_id,
        creator_id,
        notification_type,
        record_id,
        flags,
    })
}

fn decode_descriptor(data: &[u8], mut offset: usize) -> Result<SectionDescriptor, scroll::Error> {
    let le = scroll::LE;
    let offset = &mut offset;
    let section_offset = data.gread_with(offset, le)?;
    let length = data.gread_with(offset, le)?;
    let revision = data.gread_with(offset, le)?;
    *offset += 2; // Validation bits and reserved
    let flags = data.gread_with(offset, le)?;
    let section_type = read_guid(data, offset)?;
    *offset += 16; // FRU ID
    let severity = data.gread_with(offset, le)?;
    Ok(SectionDescriptor { offset: section_offset, length, revision, flags, section_type, severity })
}

fn decode_telemetry(body: &[u8]) -> Result<TelemetrySection, scroll::Error> {
    let le = scroll::LE;
    let offset = &mut 0;
    let component_id = read_guid(body, offset)?;
    let subcomponent_id = read_guid(body, offset)?;
    *offset += 4; // Reserved
    let error_status_value = body.gread_with(offset, le)?;
    let additional_info_1 = body.gread_with(offset, le)?;
    let additional_info_2 = body.gread_with(offset, le)?;
    Ok(TelemetrySection { component_id, subcomponent_id, error_status_value, additional_info_1, additional_info_2 })
}

/// Parser for a persisted hardware error record.
pub struct Parser<'a> {
    data: &'a [u8],
    header: RecordHeader,
    sections: Vec<SectionDescriptor>,
}

impl<'a> Parser<'a> {
    /// Creates a parser over the bytes of one `HwErrRec` variable.
    pub fn open(data: &'a [u8]) -> Result<Self, &'static str> {
        if data.len() < CPER_HEADER_SIZE {
            return Err("Incomplete record header.");
        }
        let header = decode_header(data).map_err(|_| "Invalid record header.")?;
        if header.record_length as usize > data.len() {
            return Err("Incomplete record.");
        }

        let mut sections = Vec::new();
        for index in 0..header.section_count as usize {
            let offset = CPER_HEADER_SIZE + index * CPER_SECTION_DESCRIPTOR_SIZE;
            let descriptor = decode_descriptor(data, offset).map_err(|_| "Incomplete section descriptor.")?;
            let end = descriptor.offset as usize + descriptor.length as usize;
            if end > header.record_length as usize {
                return Err("Section extends past the end of the record.");
            }
            sections.push(descriptor);
        }

        Ok(Self { data, header, sections })
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn sections(&self) -> &[SectionDescriptor] {
        &self.sections
    }

    /// Returns the body of a section.
    pub fn section_body(&self, section: &SectionDescriptor) -> &'a [u8] {
        let start = section.offset as usize;
        &self.data[start..start + section.length as usize]
    }

    /// Returns the decoded telemetry section, if the record has one.
    pub fn telemetry(&self) -> Option<TelemetrySection> {
        self.sections
            .iter()
            .find(|section| section.section_type == TELEMETRY_SECTION_GUID && section.length as usize >= TELEMETRY_SECTION_SIZE)
            .and_then(|section| decode_telemetry(self.section_body(section)).ok())
    }

    /// Writes the record header information to the provided output stream.
    pub fn write_header<W: std::io::Write>(&self, out: &mut W) -> Result<(), &'static str> {
        let header = &self.header;
        let mut text = format!(
            "Record ID:      {:#x}\nSeverity:       {}\nRevision:       {:#06x}\nLength:         {:#x}\nSections:       {}\n",
            header.record_id,
            severity_name(header.severity),
            header.revision,
            header.record_length,
            header.section_count,
        );
        if header.validation_bits & CPER_VALID_PLATFORM_ID != 0 {
            text.push_str(&format!("Platform:       {}\n", guid_str(&header.platform_id)));
        }
        if header.validation_bits & CPER_VALID_PARTITION_ID != 0 {
            text.push_str(&format!("Partition:      {}\n", guid_str(&header.partition_id)));
        }
        if header.validation_bits & CPER_VALID_TIMESTAMP != 0 {
            let t = &header.timestamp;
            text.push_str(&format!(
                "Timestamp:      {:02}{:02}-{:02}-{:02} {:02}:{:02}:{:02}\n",
                t[7], t[6], t[5], t[4], t[2], t[1], t[0]
            ));
        }
        text.push_str(&format!(
            "Creator:        {}\nNotification:   {}\nFlags:          {:#x}\n",
            described_guid(&header.creator_id),
            described_guid(&header.notification_type),
            header.flags
        ));
        out.write_all(text.as_bytes()).map_err(|_| "Failed to write to output.")
    }

    /// Writes every section to the provided output stream.
    pub fn write_sections<W: std::io::Write>(&self, out: &mut W) -> Result<(), &'static str> {
        for (index, section) in self.sections.iter().enumerate() {
            let mut text = format!(
                "\nSection {}: {} ({:#x} bytes at {:#x}), {}\n",
                index,
                described_guid(&section.section_type),
                section.length,
                section.offset,
                severity_name(section.severity),
            );

            let body = self.section_body(section);
            if section.section_type == TELEMETRY_SECTION_GUID {
                let telemetry = decode_telemetry(body).map_err(|_| "Incomplete telemetry section.")?;
                text.push_str(&format!(
                    "  Component:    {}\n  Subcomponent: {}\n  Status:       {:#010x}\n  Info 1:       {:#018x}\n  Info 2:       {:#018x}\n",
                    guid_str(&telemetry.component_id),
                    guid_str(&telemetry.subcomponent_id),
                    telemetry.error_status_value,
                    telemetry.additional_info_1,
                    telemetry.additional_info_2,
                ));
            } else {
                for chunk in body.chunks(16) {
                    let line: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
                    text.push_str(&format!("  {}\n", line.join(" ")));
                }
            }
            out.write_all(text.as_bytes()).map_err(|_| "Failed to write to output.")?;
        }
        Ok(())
    }
}

fn described_guid(guid: &efi::Guid) -> String {
    match guid_name(guid) {
        Some(name) => format!("{} ({})", guid_str(guid), name),
        None => guid_str(guid),
    }
}
