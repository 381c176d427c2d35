//! Serial types: SQLite's per-column type tag inside a record header, and the
//! borrowed value representation the record and cell codecs pass around.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};

/// A column value, borrowed from the page (or caller) that owns its bytes.
/// Text and blob variants are zero-copy views; decoding never allocates.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Int(i64),
    Real(f64),
    Text(&'a [u8]),
    Blob(&'a [u8]),
}

/// Number of body bytes a serial type occupies, per the record format table.
pub fn content_size(serial_type: i64) -> Result<usize> {
    match serial_type {
        0 | 8 | 9 => Ok(0),
        1 => Ok(1),
        2 => Ok(2),
        3 => Ok(3),
        4 => Ok(4),
        5 => Ok(6),
        6 => Ok(8),
        7 => Ok(8),
        10 | 11 => Err(Error::corrupt_page(0, "reserved serial type 10/11")),
        n if n >= 12 && n % 2 == 0 => Ok(((n - 12) / 2) as usize),
        n if n >= 13 => Ok(((n - 13) / 2) as usize),
        _ => Err(Error::corrupt_page(0, "negative serial type")),
    }
}

/// Choose the smallest serial type that losslessly represents `value`.
pub fn serial_type_for(value: &Value) -> i64 {
    match value {
        Value::Null => 0,
        Value::Int(0) => 8,
        Value::Int(1) => 9,
        Value::Int(i) => {
            let i = *i;
            if (i8::MIN as i64..=i8::MAX as i64).contains(&i) {
                1
            } else if (i16::MIN as i64..=i16::MAX as i64).contains(&i) {
                2
            } else if (-(1 << 23)..(1 << 23)).contains(&i) {
                3
            } else if (i32::MIN as i64..=i32::MAX as i64).contains(&i) {
                4
            } else if (-(1i64 << 47)..(1i64 << 47)).contains(&i) {
                5
            } else {
                6
            }
        }
        Value::Real(_) => 7,
        Value::Blob(b) => 12 + 2 * b.len() as i64,
        Value::Text(s) => 13 + 2 * s.len() as i64,
    }
}

/// Decode the body bytes for `serial_type` into a `Value` borrowing `data`.
/// `data` must be exactly `content_size(serial_type)` bytes.
pub fn read_value<'a>(serial_type: i64, data: &'a [u8]) -> Result<Value<'a>> {
    let mut c = Cursor::new(data);
    match serial_type {
        0 => Ok(Value::Null),
        8 => Ok(Value::Int(0)),
        9 => Ok(Value::Int(1)),
        1 => Ok(Value::Int(c.read_i8()? as i64)),
        2 => Ok(Value::Int(c.read_i16::<BigEndian>()? as i64)),
        3 => {
            let mut bytes = [0u8; 4];
            c.read_exact(&mut bytes[1..])?;
            if bytes[1] & 0x80 != 0 {
                bytes[0] = 0xff;
            }
            Ok(Value::Int(i32::from_be_bytes(bytes) as i64))
        }
        4 => Ok(Value::Int(c.read_i32::<BigEndian>()? as i64)),
        5 => {
            let mut bytes = [0u8; 8];
            c.read_exact(&mut bytes[2..])?;
            if bytes[2] & 0x80 != 0 {
                bytes[0] = 0xff;
                bytes[1] = 0xff;
            }
            Ok(Value::Int(i64::from_be_bytes(bytes)))
        }
        6 => Ok(Value::Int(c.read_i64::<BigEndian>()?)),
        7 => Ok(Value::Real(c.read_f64::<BigEndian>()?)),
        10 | 11 => Err(Error::corrupt_page(0, "reserved serial type 10/11")),
        n if n >= 12 && n % 2 == 0 => Ok(Value::Blob(data)),
        n if n >= 13 => Ok(Value::Text(data)),
        _ => Err(Error::corrupt_page(0, "negative serial type")),
    }
}

/// Write the body bytes for `value` into `out`, which must be exactly
/// `content_size(serial_type_for(value))` bytes.
pub fn write_value(value: &Value, out: &mut [u8]) -> Result<()> {
    use byteorder::WriteBytesExt;
    let mut c = Cursor::new(out);
    match value {
        Value::Null | Value::Int(0) | Value::Int(1) => {}
        Value::Int(i) => {
            let serial = serial_type_for(value);
            match serial {
                1 => c.write_i8(*i as i8)?,
                2 => c.write_i16::<BigEndian>(*i as i16)?,
                3 => {
                    let bytes = (*i as i32).to_be_bytes();
                    c.write_all(&bytes[1..])?;
                }
                4 => c.write_i32::<BigEndian>(*i as i32)?,
                5 => {
                    let bytes = i.to_be_bytes();
                    c.write_all(&bytes[2..])?;
                }
                6 => c.write_i64::<BigEndian>(*i)?,
                _ => unreachable!("serial_type_for(Int) only returns 1..6,8,9"),
            }
        }
        Value::Real(f) => c.write_f64::<BigEndian>(*f)?,
        Value::Text(s) | Value::Blob(s) => c.write_all(s)?,
    }
    Ok(())
}

/// Debug label for a serial type, used by the inspector binary.
pub fn typecode_to_string(serial_type: i64) -> &'static str {
    match serial_type {
        0 => "null",
        1 => "int1",
        2 => "int2",
        3 => "int3",
        4 => "int4",
        5 => "int6",
        6 => "int8",
        7 => "float8",
        8 => "zero",
        9 => "one",
        10 | 11 => "reserved",
        n if n >= 12 && n % 2 == 0 => "blob",
        n if n >= 13 => "text",
        _ => "invalid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_pick_smallest_fitting_width() {
        assert_eq!(serial_type_for(&Value::Int(0)), 8);
        assert_eq!(serial_type_for(&Value::Int(1)), 9);
        assert_eq!(serial_type_for(&Value::Int(127)), 1);
        assert_eq!(serial_type_for(&Value::Int(128)), 2);
        assert_eq!(serial_type_for(&Value::Int(i64::MAX)), 6);
        assert_eq!(serial_type_for(&Value::Int(-1)), 1);
    }

    #[test]
    fn reserved_types_are_rejected() {
        assert!(content_size(10).is_err());
        assert!(content_size(11).is_err());
        assert!(read_value(10, &[]).is_err());
    }

    #[test]
    fn text_and_blob_are_zero_copy() {
        let data = b"hello";
        let serial = 13 + 2 * data.len() as i64;
        match read_value(serial, data).unwrap() {
            Value::Text(s) => assert_eq!(s, data),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn int_round_trips_through_write_and_read() {
        for v in [0i64, 1, -1, 300, -300, 70000, i64::MAX, i64::MIN] {
            let serial = serial_type_for(&Value::Int(v));
            let size = content_size(serial).unwrap();
            let mut buf = vec![0u8; size];
            write_value(&Value::Int(v), &mut buf).unwrap();
            let decoded = read_value(serial, &buf).unwrap();
            assert_eq!(decoded, Value::Int(v));
        }
    }
}
