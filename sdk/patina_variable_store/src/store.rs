//! Variable store over a byte region.
//!
//! The store never rewrites a committed record. A write appends a new record and retires the previous copy by
//! clearing bits of its state byte, in an order that leaves at most one committed copy visible at every step:
//!
//! 1. the old copy is marked `VAR_IN_DELETED_TRANSITION`,
//! 2. the new header is written as `VAR_HEADER_VALID_ONLY`,
//! 3. the name and data are written,
//! 4. the new copy is marked `VAR_ADDED`,
//! 5. the old copy is marked `VAR_DELETED`.
//!
//! Space held by retired records is recovered by [`VariableStore::reclaim`].
//!
//! Every write carries a monotonic count. A write whose count is not above the highest count stored for the variable,
//! deleted copies included, is rejected before anything is written, so replaying an old update cannot roll a variable
//! back or bring back a deleted one. A reclaim keeps the newest deleted copy of a variable that has no committed copy
//! as a data-less record for the same reason.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::{fmt, ops::Range};

use patina_pi::variable::{
    header_align, name_matches, name_size, write_name, VariableAlignment, VariableAttributes, VariableHeader,
    VariableState, VariableStoreHeader, VARIABLE_DATA, VAR_ADDED, VAR_DELETED, VAR_HEADER_VALID_ONLY,
    VAR_IN_DELETED_TRANSITION,
};
use r_efi::efi;
use scroll::{Pread, Pwrite, LE};

use crate::error::VariableStoreError;

/// Value of erased flash.
pub const ERASED: u8 = 0xFF;

/// Offset of the first variable header.
pub const FIRST_VARIABLE_OFFSET: usize = header_align(VariableStoreHeader::SIZE);

/// A variable name as stored: UTF-16LE with a NUL terminator.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VariableName<'a>(&'a [u8]);

impl<'a> VariableName<'a> {
    /// The encoded name, terminator included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    /// UTF-16 code units of the name, without the terminator.
    pub fn units(&self) -> impl Iterator<Item = u16> + 'a {
        self.0.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])).take_while(|unit| *unit != 0)
    }

    /// Whether this is the encoding of `name`.
    pub fn matches(&self, name: &str) -> bool {
        name_matches(self.0, name)
    }
}

impl fmt::Display for VariableName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in char::decode_utf16(self.units()) {
            fmt::Write::write_char(f, c.unwrap_or(char::REPLACEMENT_CHARACTER))?;
        }
        Ok(())
    }
}

impl fmt::Debug for VariableName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// A variable record as found in the store, in any state.
#[derive(Debug, Clone, Copy)]
pub struct VariableRecord<'a> {
    /// Offset of the record header from the start of the store.
    pub offset: usize,
    pub header: VariableHeader,
    pub name: VariableName<'a>,
    pub data: &'a [u8],
}

impl VariableRecord<'_> {
    pub fn state(&self) -> VariableState {
        self.header.state()
    }

    pub fn attributes(&self) -> VariableAttributes {
        self.header.attributes()
    }

    pub fn vendor_guid(&self) -> efi::Guid {
        self.header.vendor_guid
    }

    pub fn monotonic_count(&self) -> u64 {
        self.header.monotonic_count
    }

    fn is(&self, name: &str, vendor_guid: &efi::Guid) -> bool {
        self.header.vendor_guid == *vendor_guid && self.name.matches(name)
    }
}

/// Iterator over the records of a store, in write order.
pub struct VariableIter<'a> {
    buffer: &'a [u8],
    alignment: VariableAlignment,
    offset: usize,
    end: usize,
}

impl<'a> Iterator for VariableIter<'a> {
    type Item = VariableRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset.checked_add(VariableHeader::SIZE)? > self.end {
            return None;
        }
        let header: VariableHeader = self.buffer.pread_with(self.offset, LE).ok()?;
        if !header.is_valid() {
            return None;
        }
        let name_offset = header.name_offset(self.offset);
        let data_offset = header.data_offset(self.offset, self.alignment);
        let name = self.buffer.get(name_offset..name_offset + header.name_size as usize)?;
        let data = self.buffer.get(data_offset..data_offset + header.data_size as usize)?;

        let record = VariableRecord { offset: self.offset, header, name: VariableName(name), data };
        self.offset = header.next_offset(self.offset, self.alignment);
        Some(record)
    }
}

/// A copy of a variable located during a write.
#[derive(Clone, Copy)]
struct StoredCopy {
    offset: usize,
    header: VariableHeader,
}

/// Every copy of a variable that matters to a write.
#[derive(Default)]
struct Located {
    added: Option<StoredCopy>,
    in_transition: Option<StoredCopy>,
    /// Highest count over every copy that was ever committed.
    highest_count: Option<u64>,
}

/// A monotonic counter based variable store backed by a byte region.
pub struct VariableStore<'a> {
    buffer: &'a mut [u8],
    alignment: VariableAlignment,
    end_of_variables: usize,
    monotonic_count: u64,
}

impl<'a> VariableStore<'a> {
    /// Erases `buffer` and writes an empty store header covering all of it.
    pub fn format(buffer: &'a mut [u8], alignment: VariableAlignment) -> Result<Self, VariableStoreError> {
        if buffer.len() < FIRST_VARIABLE_OFFSET {
            return Err(VariableStoreError::BufferTooSmall);
        }
        let size = u32::try_from(buffer.len()).map_err(|_| VariableStoreError::InvalidParameter)?;

        buffer.fill(ERASED);
        buffer.pwrite_with(VariableStoreHeader::new(size), 0, LE)?;
        log::info!(target: "variable_store", "Formatted variable store of {:#x} bytes", size);

        Ok(Self { buffer, alignment, end_of_variables: FIRST_VARIABLE_OFFSET, monotonic_count: 0 })
    }

    /// Opens an existing store at the start of `buffer`.
    ///
    /// Every record is bounds checked against the size in the store header. The first header without the start
    /// marker ends the record list.
    ///
    /// ## Errors
    ///
    /// - [`VariableStoreError::BufferTooSmall`] when `buffer` cannot hold a store header.
    /// - [`VariableStoreError::InvalidHeader`] when the store is not formatted and healthy.
    /// - [`VariableStoreError::VolumeCorrupted`] when the store size or a record runs past the buffer.
    pub fn open(buffer: &'a mut [u8], alignment: VariableAlignment) -> Result<Self, VariableStoreError> {
        let header: VariableStoreHeader =
            buffer.pread_with(0, LE).map_err(|_| VariableStoreError::BufferTooSmall)?;
        if !header.is_valid() {
            log::warn!(target: "variable_store", "Variable store header is not formatted: {:?}", header);
            return Err(VariableStoreError::InvalidHeader);
        }
        let size = header.size as usize;
        if size < FIRST_VARIABLE_OFFSET || size > buffer.len() {
            log::error!(target: "variable_store", "Store size {:#x} does not fit {:#x} bytes", size, buffer.len());
            return Err(VariableStoreError::VolumeCorrupted);
        }
        let buffer = &mut buffer[..size];

        let (end_of_variables, monotonic_count) = Self::scan(buffer, alignment)?;
        log::debug!(
            target: "variable_store",
            "Opened variable store: {:#x} of {:#x} bytes used, monotonic count {}",
            end_of_variables,
            size,
            monotonic_count
        );
        Ok(Self { buffer, alignment, end_of_variables, monotonic_count })
    }

    /// Walks the records, returning the end of the last one and the highest monotonic count seen.
    ///
    /// A trailing header that was never committed and whose sizes do not fit is the remains of a write cut short while
    /// the header itself was being written. It ends the used area like erased space does.
    fn scan(buffer: &[u8], alignment: VariableAlignment) -> Result<(usize, u64), VariableStoreError> {
        let mut offset = FIRST_VARIABLE_OFFSET;
        let mut monotonic_count = 0;

        while offset + VariableHeader::SIZE <= buffer.len() {
            let header: VariableHeader = buffer.pread_with(offset, LE)?;
            if !header.is_valid() {
                break;
            }
            let fits = header.name_size as usize <= buffer.len()
                && header.data_size as usize <= buffer.len()
                && header.data_offset(offset, alignment) + header.data_size as usize <= buffer.len();
            if !fits {
                if header.state() == VariableState::HeaderValidOnly {
                    log::warn!(target: "variable_store", "Ignoring partially written header at {:#x}", offset);
                    break;
                }
                log::error!(target: "variable_store", "Variable at {:#x} runs past the end of the store", offset);
                return Err(VariableStoreError::VolumeCorrupted);
            }

            if header.state() != VariableState::HeaderValidOnly {
                monotonic_count = monotonic_count.max(header.monotonic_count);
            }
            offset = header.next_offset(offset, alignment).min(buffer.len());
        }

        Ok((offset.min(buffer.len()), monotonic_count))
    }

    /// All records, in any state, in write order.
    pub fn variables(&self) -> VariableIter<'_> {
        VariableIter {
            buffer: &*self.buffer,
            alignment: self.alignment,
            offset: FIRST_VARIABLE_OFFSET,
            end: self.end_of_variables,
        }
    }

    /// Name and vendor GUID of every committed variable.
    pub fn variable_names(&self) -> impl Iterator<Item = (VariableName<'_>, efi::Guid)> + '_ {
        self.variables()
            .filter(|record| record.state() == VariableState::Added)
            .map(|record| (record.name, record.vendor_guid()))
    }

    /// Finds the committed copy of a variable.
    pub fn get_variable(&self, name: &str, vendor_guid: &efi::Guid) -> Result<VariableRecord<'_>, VariableStoreError> {
        self.variables()
            .find(|record| record.state() == VariableState::Added && record.is(name, vendor_guid))
            .ok_or(VariableStoreError::NotFound)
    }

    /// Copies the data of a committed variable into `data`. Returns its attributes and size.
    ///
    /// Fails with [`VariableStoreError::BufferTooSmall`] when `data` is shorter than the variable.
    pub fn read_variable(
        &self,
        name: &str,
        vendor_guid: &efi::Guid,
        data: &mut [u8],
    ) -> Result<(VariableAttributes, usize), VariableStoreError> {
        let record = self.get_variable(name, vendor_guid)?;
        let size = record.data.len();
        let dest = data.get_mut(..size).ok_or(VariableStoreError::BufferTooSmall)?;
        dest.copy_from_slice(record.data);
        Ok((record.attributes(), size))
    }

    /// Writes a variable with the next store-wide monotonic count.
    ///
    /// See [`set_variable_with_count`](Self::set_variable_with_count).
    pub fn set_variable(
        &mut self,
        name: &str,
        vendor_guid: &efi::Guid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), VariableStoreError> {
        let monotonic_count = self.monotonic_count.checked_add(1).ok_or(VariableStoreError::StaleMonotonicCount)?;
        self.set_variable_with_count(name, vendor_guid, attributes, monotonic_count, data)
    }

    /// Writes, updates or deletes a variable.
    ///
    /// Empty `data` deletes the variable. Every check runs before the first byte is written, so a failed call leaves
    /// the store unchanged.
    ///
    /// ## Errors
    ///
    /// - [`VariableStoreError::InvalidParameter`] for an empty name, runtime access without boot service access, or
    ///   attributes that differ from the stored copy.
    /// - [`VariableStoreError::StaleMonotonicCount`] when `monotonic_count` is not above the highest count stored for
    ///   the variable, deleted copies included.
    /// - [`VariableStoreError::NotFound`] when deleting a variable that does not exist.
    /// - [`VariableStoreError::VolumeFull`] when the new record does not fit.
    pub fn set_variable_with_count(
        &mut self,
        name: &str,
        vendor_guid: &efi::Guid,
        attributes: VariableAttributes,
        monotonic_count: u64,
        data: &[u8],
    ) -> Result<(), VariableStoreError> {
        if name.is_empty() || name.contains('\0') {
            return Err(VariableStoreError::InvalidParameter);
        }
        if attributes.contains(VariableAttributes::RUNTIME_ACCESS)
            && !attributes.contains(VariableAttributes::BOOTSERVICE_ACCESS)
        {
            return Err(VariableStoreError::InvalidParameter);
        }

        let located = self.locate(name, vendor_guid);
        let existing = located.added.or(located.in_transition);

        if let Some(highest) = located.highest_count {
            if monotonic_count <= highest {
                log::warn!(
                    target: "variable_store",
                    "Rejected write of {} with stale monotonic count {} (stored {})",
                    name,
                    monotonic_count,
                    highest
                );
                return Err(VariableStoreError::StaleMonotonicCount);
            }
        }

        if data.is_empty() {
            if existing.is_none() {
                return Err(VariableStoreError::NotFound);
            }
            self.retire(&located)?;
            self.monotonic_count = self.monotonic_count.max(monotonic_count);
            log::debug!(target: "variable_store", "Deleted {}", name);
            return Ok(());
        }

        if let Some(existing) = existing {
            if existing.header.attributes() != attributes {
                log::warn!(
                    target: "variable_store",
                    "Rejected write of {}: attributes {:?} do not match stored {:?}",
                    name,
                    attributes,
                    existing.header.attributes()
                );
                return Err(VariableStoreError::InvalidParameter);
            }
        }

        let data_size = u32::try_from(data.len()).map_err(|_| VariableStoreError::InvalidParameter)?;
        let name_size = name_size(name);
        let record_size = VariableHeader::record_size(name_size, data.len(), self.alignment);
        let offset = self.end_of_variables;
        if record_size > self.free_space() {
            log::warn!(
                target: "variable_store",
                "No room for {} ({:#x} bytes, {:#x} free)",
                name,
                record_size,
                self.free_space()
            );
            return Err(VariableStoreError::VolumeFull);
        }

        if let Some(added) = located.added {
            self.set_state(added.offset, VAR_IN_DELETED_TRANSITION)?;
        }

        let header = VariableHeader {
            start_id: VARIABLE_DATA,
            state: VAR_HEADER_VALID_ONLY,
            reserved: 0,
            attributes: attributes.bits(),
            monotonic_count,
            pubkey_index: 0,
            name_size: name_size as u32,
            data_size,
            vendor_guid: *vendor_guid,
        };
        self.buffer.pwrite_with(header, offset, LE)?;
        let mut cursor = header.name_offset(offset);
        write_name(self.buffer, &mut cursor, name)?;
        let data_offset = header.data_offset(offset, self.alignment);
        self.buffer[data_offset..data_offset + data.len()].copy_from_slice(data);
        self.set_state(offset, VAR_ADDED)?;

        self.retire(&located)?;

        self.end_of_variables = offset + record_size;
        self.monotonic_count = self.monotonic_count.max(monotonic_count);
        log::debug!(
            target: "variable_store",
            "Wrote {} ({:#x} bytes) at {:#x}, monotonic count {}",
            name,
            data.len(),
            offset,
            monotonic_count
        );
        Ok(())
    }

    /// Deletes a variable.
    pub fn delete_variable(&mut self, name: &str, vendor_guid: &efi::Guid) -> Result<(), VariableStoreError> {
        self.set_variable(name, vendor_guid, VariableAttributes::empty(), &[])
    }

    /// Compacts the store, dropping retired records. Returns the number of bytes recovered.
    ///
    /// Committed copies are kept. A copy left in transition by an interrupted update is kept, and committed, only
    /// when no committed copy of the same variable exists. The newest deleted copy of a variable with no committed
    /// copy is kept without its data, so its monotonic count still guards against replay.
    pub fn reclaim(&mut self) -> Result<usize, VariableStoreError> {
        let end = self.end_of_variables;
        let mut read = FIRST_VARIABLE_OFFSET;
        let mut write = FIRST_VARIABLE_OFFSET;

        while read + VariableHeader::SIZE <= end {
            let header: VariableHeader = self.buffer.pread_with(read, LE)?;
            if !header.is_valid() {
                break;
            }
            let next = header.next_offset(read, self.alignment).min(end);
            let name_offset = header.name_offset(read);
            let name = &self.buffer[name_offset..name_offset + header.name_size as usize];
            let guid = &header.vendor_guid;

            let kept = match header.state() {
                VariableState::Added => Some(header),
                VariableState::InDeletedTransition => {
                    let committed = self.has_copy(FIRST_VARIABLE_OFFSET..write, name, guid, is_added)
                        || self.has_copy(next..end, name, guid, is_added);
                    (!committed).then_some(VariableHeader { state: VAR_ADDED, ..header })
                }
                VariableState::Deleted => {
                    let superseded = self.has_copy(FIRST_VARIABLE_OFFSET..write, name, guid, is_added)
                        || self.has_copy(next..end, name, guid, was_committed);
                    (!superseded).then_some(VariableHeader { data_size: 0, ..header })
                }
                _ => None,
            };

            if let Some(kept) = kept {
                let size = kept.next_offset(write, self.alignment) - write;
                self.buffer.copy_within(read..read + size, write);
                self.buffer.pwrite_with(kept, write, LE)?;
                if kept.data_size != header.data_size {
                    let name_end = kept.name_offset(write) + kept.name_size as usize;
                    self.buffer[name_end..write + size].fill(ERASED);
                }
                write += size;
            }
            read = next;
        }

        self.buffer[write..].fill(ERASED);
        self.end_of_variables = write;
        log::info!(target: "variable_store", "Reclaimed {:#x} bytes", end - write);
        Ok(end - write)
    }

    /// Bytes available for new records.
    pub fn free_space(&self) -> usize {
        self.buffer.len() - self.end_of_variables
    }

    /// Highest monotonic count written to the store.
    pub fn monotonic_count(&self) -> u64 {
        self.monotonic_count
    }

    /// Alignment of names and data inside records.
    pub fn alignment(&self) -> VariableAlignment {
        self.alignment
    }

    /// The raw store, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &*self.buffer
    }

    fn locate(&self, name: &str, vendor_guid: &efi::Guid) -> Located {
        let mut located = Located::default();
        for record in self.variables().filter(|record| record.is(name, vendor_guid)) {
            let copy = StoredCopy { offset: record.offset, header: record.header };
            match record.state() {
                VariableState::Added => located.added = Some(copy),
                VariableState::InDeletedTransition => located.in_transition = Some(copy),
                VariableState::Deleted => {}
                _ => continue,
            }
            located.highest_count = located.highest_count.max(Some(record.monotonic_count()));
        }
        located
    }

    /// Marks the committed copy and any copy left in transition as deleted.
    fn retire(&mut self, located: &Located) -> Result<(), VariableStoreError> {
        for copy in [located.added, located.in_transition].into_iter().flatten() {
            self.set_state(copy.offset, VAR_DELETED)?;
        }
        Ok(())
    }

    fn has_copy(
        &self,
        range: Range<usize>,
        name: &[u8],
        vendor_guid: &efi::Guid,
        state: impl Fn(VariableState) -> bool,
    ) -> bool {
        let records =
            VariableIter { buffer: &*self.buffer, alignment: self.alignment, offset: range.start, end: range.end };
        records
            .filter(|record| state(record.state()))
            .any(|record| record.header.vendor_guid == *vendor_guid && record.name.as_bytes() == name)
    }

    fn set_state(&mut self, offset: usize, mask: u8) -> Result<(), VariableStoreError> {
        let state =
            self.buffer.get_mut(offset + VariableHeader::STATE_OFFSET).ok_or(VariableStoreError::VolumeCorrupted)?;
        *state = VariableState::transition(*state, mask);
        Ok(())
    }
}

fn is_added(state: VariableState) -> bool {
    state == VariableState::Added
}

fn was_committed(state: VariableState) -> bool {
    matches!(state, VariableState::Added | VariableState::InDeletedTransition | VariableState::Deleted)
}

impl fmt::Debug for VariableStore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableStore")
            .field("size", &self.buffer.len())
            .field("alignment", &self.alignment)
            .field("end_of_variables", &self.end_of_variables)
            .field("monotonic_count", &self.monotonic_count)
            .finish()
    }
}
