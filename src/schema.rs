//! Schema reader: a pure consumer of the b-tree cursor over the
//! `sqlite_schema` table rooted at page 1. Returns the raw rows SQLite
//! itself stores there (type, name, associated table, root page, and the
//! original `CREATE` statement text); parsing that SQL into column
//! descriptors is a query engine's job, not this crate's.

use crate::btree::Cursor;
use crate::error::{Error, Result};
use crate::page::PageSource;
use crate::record::Record;
use crate::serial_type::Value;

/// Page number of the root b-tree every database's schema table lives at.
pub const SCHEMA_ROOT_PAGE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaObjectKind {
    Table,
    Index,
    View,
    Trigger,
}

impl SchemaObjectKind {
    fn parse(raw: &[u8]) -> Result<Self> {
        match raw {
            b"table" => Ok(SchemaObjectKind::Table),
            b"index" => Ok(SchemaObjectKind::Index),
            b"view" => Ok(SchemaObjectKind::View),
            b"trigger" => Ok(SchemaObjectKind::Trigger),
            other => Err(Error::InvalidDatabase(format!(
                "unrecognized sqlite_schema type {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

/// One row of `sqlite_schema`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub kind: SchemaObjectKind,
    pub name: String,
    pub table_name: String,
    /// `None` for views and triggers, which have no root page of their own.
    pub root_page: Option<u32>,
    pub sql: Option<String>,
}

fn text_column(record: &Record<'_>, index: usize) -> Result<String> {
    match record.column(index)? {
        Value::Text(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Value::Null => Ok(String::new()),
        other => Err(Error::InvalidDatabase(format!(
            "expected text in sqlite_schema column {index}, found {other:?}"
        ))),
    }
}

fn optional_text_column(record: &Record<'_>, index: usize) -> Result<Option<String>> {
    match record.column(index)? {
        Value::Text(bytes) => Ok(Some(String::from_utf8_lossy(bytes).into_owned())),
        Value::Null => Ok(None),
        other => Err(Error::InvalidDatabase(format!(
            "expected text or null in sqlite_schema column {index}, found {other:?}"
        ))),
    }
}

fn row_to_entry(record: &Record<'_>) -> Result<SchemaEntry> {
    if record.column_count() < 5 {
        return Err(Error::InvalidDatabase("sqlite_schema row has fewer than 5 columns".into()));
    }
    let kind = match record.column(0)? {
        Value::Text(bytes) => SchemaObjectKind::parse(bytes)?,
        other => return Err(Error::InvalidDatabase(format!("sqlite_schema type column was {other:?}"))),
    };
    let name = text_column(record, 1)?;
    let table_name = text_column(record, 2)?;
    let root_page = match record.column(3)? {
        Value::Int(0) => None,
        Value::Int(n) if n > 0 => Some(n as u32),
        Value::Null => None,
        other => return Err(Error::InvalidDatabase(format!("sqlite_schema rootpage column was {other:?}"))),
    };
    let sql = optional_text_column(record, 4)?;

    Ok(SchemaEntry {
        kind,
        name,
        table_name,
        root_page,
        sql,
    })
}

/// Reads the full set of `sqlite_schema` rows from `source`'s page 1 tree.
pub struct SchemaReader<'s, S: PageSource> {
    source: &'s S,
}

impl<'s, S: PageSource> SchemaReader<'s, S> {
    pub fn new(source: &'s S) -> Self {
        SchemaReader { source }
    }

    /// Every row in `sqlite_schema`, in b-tree (rowid) order.
    pub fn entries(&self) -> Result<Vec<SchemaEntry>> {
        let mut cursor = Cursor::open_at(self.source, SCHEMA_ROOT_PAGE)?;
        let mut out = Vec::new();
        if !cursor.is_valid() {
            return Ok(out);
        }
        loop {
            let payload = cursor.payload()?.to_vec();
            let record = Record::parse(&payload)?;
            out.push(row_to_entry(&record)?);
            if !cursor.move_next()? {
                break;
            }
        }
        Ok(out)
    }

    pub fn enumerate_tables(&self) -> Result<Vec<SchemaEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.kind == SchemaObjectKind::Table)
            .collect())
    }

    pub fn enumerate_indexes(&self) -> Result<Vec<SchemaEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.kind == SchemaObjectKind::Index)
            .collect())
    }

    pub fn enumerate_views(&self) -> Result<Vec<SchemaEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.kind == SchemaObjectKind::View)
            .collect())
    }

    /// The root page of table (or index) `name`, if it exists.
    pub fn root_page_of(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.entries()?.into_iter().find(|e| e.name == name).and_then(|e| e.root_page))
    }
}
