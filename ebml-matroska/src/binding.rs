// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binding of decoded elements onto plain structs.
//!
//! Each record type describes its children once, in a [`Table`] mapping element IDs to a
//! [`Field`]: how to decode the payload and where to store it. The tables of every record type
//! are built up front into a [`Registry`] that is passed to [`read_record`] by reference.
//!
//! ```ignore
//! impl Record for Audio {
//!     fn table() -> Table<Self> {
//!         Table::<Self>::builder()
//!             .float(ids::SAMPLING_FREQUENCY, |audio, value| audio.sampling_frequency = value)
//!             .unsigned(ids::CHANNELS, |audio, value| audio.channels = value)
//!             .build()
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::fmt;

use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};

use ebml_core::errors::{sequence_error, Result};
use ebml_core::io::ReadBytes;

use crate::header::ElementHeader;
use crate::reader::EbmlReader;
use crate::schema::Schema;

/// The reader operations needed to bind records.
///
/// The trait is object safe so that nested records can be read through one `&mut dyn`
/// reference regardless of the byte source.
pub trait ElementSource {
    fn advance_to_next(&mut self) -> Result<Option<ElementHeader>>;
    fn enter_container(&mut self) -> Result<()>;
    fn leave_container(&mut self) -> Result<()>;
    fn read_unsigned(&mut self) -> Result<u64>;
    fn read_signed(&mut self) -> Result<i64>;
    fn read_float(&mut self) -> Result<f64>;
    fn read_date(&mut self) -> Result<DateTime<Utc>>;
    fn read_ascii(&mut self) -> Result<String>;
    fn read_utf8(&mut self) -> Result<String>;
    fn read_binary(&mut self) -> Result<Box<[u8]>>;
    /// The element dictionary used for diagnostics.
    fn schema(&self) -> Option<&'static dyn Schema>;
}

impl<R: ReadBytes> ElementSource for EbmlReader<R> {
    fn advance_to_next(&mut self) -> Result<Option<ElementHeader>> {
        EbmlReader::advance_to_next(self)
    }

    fn enter_container(&mut self) -> Result<()> {
        EbmlReader::enter_container(self)
    }

    fn leave_container(&mut self) -> Result<()> {
        EbmlReader::leave_container(self)
    }

    fn read_unsigned(&mut self) -> Result<u64> {
        EbmlReader::read_unsigned(self)
    }

    fn read_signed(&mut self) -> Result<i64> {
        EbmlReader::read_signed(self)
    }

    fn read_float(&mut self) -> Result<f64> {
        EbmlReader::read_float(self)
    }

    fn read_date(&mut self) -> Result<DateTime<Utc>> {
        EbmlReader::read_date(self)
    }

    fn read_ascii(&mut self) -> Result<String> {
        EbmlReader::read_ascii(self)
    }

    fn read_utf8(&mut self) -> Result<String> {
        EbmlReader::read_utf8(self)
    }

    fn read_binary(&mut self) -> Result<Box<[u8]>> {
        EbmlReader::read_binary(self)
    }

    fn schema(&self) -> Option<&'static dyn Schema> {
        self.options().schema
    }
}

/// Reads a nested record and stores it into its parent.
pub type MasterFn<T> =
    Box<dyn Fn(&Registry, &mut dyn ElementSource, &mut T) -> Result<()> + Send + Sync>;

/// How one child element is decoded and stored into a record of type `T`.
pub enum Field<T> {
    Unsigned(fn(&mut T, u64)),
    Signed(fn(&mut T, i64)),
    Float(fn(&mut T, f64)),
    Date(fn(&mut T, DateTime<Utc>)),
    Ascii(fn(&mut T, String)),
    Utf8(fn(&mut T, String)),
    Binary(fn(&mut T, Box<[u8]>)),
    /// A nested record that occurs at most once.
    Master(MasterFn<T>),
    /// A nested record that may occur any number of times.
    RepeatedMaster(MasterFn<T>),
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Unsigned(_) => "Unsigned",
            Field::Signed(_) => "Signed",
            Field::Float(_) => "Float",
            Field::Date(_) => "Date",
            Field::Ascii(_) => "Ascii",
            Field::Utf8(_) => "Utf8",
            Field::Binary(_) => "Binary",
            Field::Master(_) => "Master",
            Field::RepeatedMaster(_) => "RepeatedMaster",
        };
        f.write_str(name)
    }
}

struct Entry<T> {
    field: Field<T>,
    multiple: bool,
}

/// The dispatch table of a record type.
pub struct Table<T> {
    entries: HashMap<u32, Entry<T>>,
}

impl<T: 'static> Table<T> {
    pub fn builder() -> TableBuilder<T> {
        TableBuilder { entries: HashMap::new() }
    }

    /// Looks up the field bound to an element ID.
    pub fn get(&self, id: u32) -> Option<&Field<T>> {
        self.entries.get(&id).map(|entry| &entry.field)
    }

    /// Returns `true` if the element may occur more than once in the record.
    pub fn is_multiple(&self, id: u32) -> bool {
        self.entries.get(&id).is_some_and(|entry| entry.multiple)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct TableBuilder<T> {
    entries: HashMap<u32, Entry<T>>,
}

impl<T: 'static> TableBuilder<T> {
    fn field(mut self, id: u32, field: Field<T>, multiple: bool) -> Self {
        self.entries.insert(id, Entry { field, multiple });
        self
    }

    pub fn unsigned(self, id: u32, set: fn(&mut T, u64)) -> Self {
        self.field(id, Field::Unsigned(set), false)
    }

    pub fn signed(self, id: u32, set: fn(&mut T, i64)) -> Self {
        self.field(id, Field::Signed(set), false)
    }

    pub fn float(self, id: u32, set: fn(&mut T, f64)) -> Self {
        self.field(id, Field::Float(set), false)
    }

    pub fn date(self, id: u32, set: fn(&mut T, DateTime<Utc>)) -> Self {
        self.field(id, Field::Date(set), false)
    }

    pub fn ascii(self, id: u32, set: fn(&mut T, String)) -> Self {
        self.field(id, Field::Ascii(set), false)
    }

    pub fn utf8(self, id: u32, set: fn(&mut T, String)) -> Self {
        self.field(id, Field::Utf8(set), false)
    }

    pub fn binary(self, id: u32, set: fn(&mut T, Box<[u8]>)) -> Self {
        self.field(id, Field::Binary(set), false)
    }

    /// Binds a binary element that may occur any number of times. `push` is called for each.
    pub fn repeated_binary(self, id: u32, push: fn(&mut T, Box<[u8]>)) -> Self {
        self.field(id, Field::Binary(push), true)
    }

    /// Binds a nested record of type `C`.
    pub fn master<C: Record>(self, id: u32, set: fn(&mut T, C)) -> Self {
        let read: MasterFn<T> = Box::new(move |registry, source, record| {
            set(record, read_record::<C>(registry, source)?);
            Ok(())
        });
        self.field(id, Field::Master(read), false)
    }

    /// Binds a nested record of type `C` that may occur any number of times.
    pub fn repeated<C: Record>(self, id: u32, push: fn(&mut T, C)) -> Self {
        let read: MasterFn<T> = Box::new(move |registry, source, record| {
            push(record, read_record::<C>(registry, source)?);
            Ok(())
        });
        self.field(id, Field::RepeatedMaster(read), true)
    }

    pub fn build(self) -> Table<T> {
        Table { entries: self.entries }
    }
}

/// A struct that can be bound from the children of a master element.
pub trait Record: Default + Sized + 'static {
    /// Builds the dispatch table. Called once, by [`Registry::register`].
    fn table() -> Table<Self>;
}

/// Owns the dispatch tables of every registered record type.
#[derive(Default)]
pub struct Registry {
    tables: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Registry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Builds and stores the table of `T`, replacing an existing one.
    pub fn register<T: Record>(&mut self) {
        self.tables.insert(TypeId::of::<T>(), Box::new(T::table()));
    }

    /// Builder-style [`Registry::register`].
    pub fn with<T: Record>(mut self) -> Self {
        self.register::<T>();
        self
    }

    pub fn table<T: Record>(&self) -> Option<&Table<T>> {
        self.tables.get(&TypeId::of::<T>()).and_then(|table| table.downcast_ref::<Table<T>>())
    }

    pub fn contains<T: Record>(&self) -> bool {
        self.tables.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("tables", &self.tables.len()).finish()
    }
}

/// Reads the current element of `source` as a record of type `T`.
///
/// The source must be positioned on the master element. Its children are bound through the
/// table of `T`; unbound children are skipped. On return the element has been left.
pub fn read_record<T: Record>(registry: &Registry, source: &mut dyn ElementSource) -> Result<T> {
    let table = match registry.table::<T>() {
        Some(table) => table,
        None => return sequence_error("ebml: record type is not registered"),
    };

    source.enter_container()?;

    let mut record = T::default();
    let mut seen = HashSet::new();

    while let Some(header) = source.advance_to_next()? {
        let entry = match table.entries.get(&header.id) {
            Some(entry) => entry,
            None => {
                match source.schema().and_then(|schema| schema.get(header.id)) {
                    Some(info) => log::debug!("ignoring element {} ({:#x})", info.name, header.id),
                    None => log::warn!("skipping unknown element {:#x}", header.id),
                }
                continue;
            }
        };

        if !entry.multiple && !seen.insert(header.id) {
            log::warn!("duplicate element {:#x}, keeping the last value", header.id);
        }

        match &entry.field {
            Field::Unsigned(set) => set(&mut record, source.read_unsigned()?),
            Field::Signed(set) => set(&mut record, source.read_signed()?),
            Field::Float(set) => set(&mut record, source.read_float()?),
            Field::Date(set) => set(&mut record, source.read_date()?),
            Field::Ascii(set) => set(&mut record, source.read_ascii()?),
            Field::Utf8(set) => set(&mut record, source.read_utf8()?),
            Field::Binary(set) => set(&mut record, source.read_binary()?),
            Field::Master(read) | Field::RepeatedMaster(read) => {
                read(registry, source, &mut record)?
            }
        }
    }

    source.leave_container()?;

    Ok(record)
}
