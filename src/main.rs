//! `sharc-dump`: a minimal schema/page inspector over the `sharc` library,
//! analogous to the teacher crate's own `main.rs`. Not a query engine —
//! SQL parsing, planning, and execution are a separate crate's job; this
//! binary exists to exercise the storage core end to end: open a file,
//! read its schema, and dump every table's rows via the b-tree cursor.

use std::process::ExitCode;

use sharc::schema::SchemaObjectKind;
use sharc::serial_type::Value;
use sharc::{Database, OpenOptions};

fn print_row(rowid: i64, values: &[Value]) {
    print!("{rowid:6} |");
    for v in values {
        let rendered = match v {
            Value::Null => "NULL".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Real(f) => f.to_string(),
            Value::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Value::Blob(bytes) => format!("<{} bytes>", bytes.len()),
        };
        print!(" {rendered:15} |");
    }
    println!();
}

fn dump_table(db: &Database, table_name: &str, root_page: u32) -> sharc::Result<()> {
    println!("-- {table_name} (root page {root_page}) --");
    let mut cursor = db.cursor(root_page)?;
    if !cursor.is_valid() {
        println!("(empty)");
        return Ok(());
    }
    loop {
        let rowid = cursor.rowid()?;
        let payload = cursor.payload()?.to_vec();
        let record = sharc::record::Record::parse(&payload)?;
        print_row(rowid, &record.columns()?);
        if !cursor.move_next()? {
            break;
        }
    }
    Ok(())
}

fn run(path: &str) -> sharc::Result<()> {
    let db = OpenOptions::new().open(path)?;
    log::info!("opened {path}: page_size={}, page_count={}", db.page_size(), db.page_count());

    println!("-- sqlite_schema --");
    let schema = db.schema()?;
    for entry in &schema {
        println!(
            "{:?} {:20} tbl={:20} root={:?} sql={:?}",
            entry.kind, entry.name, entry.table_name, entry.root_page, entry.sql
        );
    }

    for entry in schema.iter().filter(|e| e.kind == SchemaObjectKind::Table) {
        if let Some(root_page) = entry.root_page {
            dump_table(&db, &entry.name, root_page)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let path = std::env::args().nth(1).unwrap_or_else(|| "./record.db".to_string());
    match run(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sharc-dump: {} ({})", e, e.kind());
            ExitCode::FAILURE
        }
    }
}
