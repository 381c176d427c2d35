//! Record payload codec: header-size varint, one serial-type varint per
//! column, then column bodies concatenated. Operates entirely on borrowed
//! byte spans; decoding never allocates.

use crate::error::{Error, Result};
use crate::serial_type::{self, Value};
use crate::varint;

/// A decoded record: the serial types from the header, and the byte offset
/// of each column's body within `payload`. Offsets are computed once so
/// random column access afterward is O(1).
pub struct Record<'a> {
    payload: &'a [u8],
    serial_types: Vec<i64>,
    offsets: Vec<usize>,
}

impl<'a> Record<'a> {
    /// Parse a record payload. `payload` must start at the header-size
    /// varint and run through the last column body byte.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (header_len, header_len_len) = varint::decode(payload)?;
        let header_len = header_len as usize;
        if header_len > payload.len() {
            return Err(Error::corrupt_page(0, "record header longer than payload"));
        }

        let mut serial_types = Vec::new();
        let mut offset = header_len_len;
        while offset < header_len {
            let (serial_type, len) = varint::decode(&payload[offset..])?;
            serial_types.push(serial_type);
            offset += len;
        }

        let mut offsets = Vec::with_capacity(serial_types.len());
        let mut body_offset = header_len;
        for &serial_type in &serial_types {
            offsets.push(body_offset);
            body_offset += serial_type::content_size(serial_type)?;
        }
        if body_offset > payload.len() {
            return Err(Error::corrupt_page(0, "record body shorter than header promises"));
        }

        Ok(Record {
            payload,
            serial_types,
            offsets,
        })
    }

    pub fn column_count(&self) -> usize {
        self.serial_types.len()
    }

    /// Decode column `index`, borrowing text/blob bodies directly from the
    /// backing payload.
    pub fn column(&self, index: usize) -> Result<Value<'a>> {
        let serial_type = *self
            .serial_types
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("column {index} out of range")))?;
        let offset = self.offsets[index];
        let size = serial_type::content_size(serial_type)?;
        serial_type::read_value(serial_type, &self.payload[offset..offset + size])
    }

    pub fn columns(&self) -> Result<Vec<Value<'a>>> {
        (0..self.column_count()).map(|i| self.column(i)).collect()
    }
}

/// Encode a row's column values into a fresh record payload.
///
/// The header-size varint's own length depends on the header's total size,
/// which depends on the varint, so this iterates to a fixed point (at most
/// two passes in practice, since header sizes that straddle a varint-width
/// boundary are vanishingly rare).
pub fn encode(values: &[Value]) -> Vec<u8> {
    let serial_types: Vec<i64> = values.iter().map(serial_type::serial_type_for).collect();
    let body_size: usize = serial_types
        .iter()
        .map(|&st| serial_type::content_size(st).expect("serial_type_for never returns a reserved type"))
        .sum();
    let serial_type_varints_size: usize = serial_types.iter().map(|&st| varint::encoded_length(st)).sum();

    let mut header_len = 1 + serial_type_varints_size;
    loop {
        let candidate_len = varint::encoded_length(header_len as i64) + serial_type_varints_size;
        if candidate_len == header_len {
            break;
        }
        header_len = candidate_len;
    }

    let mut out = vec![0u8; header_len + body_size];
    let mut offset = varint::encode(header_len as i64, &mut out).expect("buffer sized for header_len above");
    for &st in &serial_types {
        offset += varint::encode(st, &mut out[offset..]).expect("buffer sized for serial type above");
    }
    for (value, &st) in values.iter().zip(&serial_types) {
        let size = serial_type::content_size(st).expect("computed above");
        serial_type::write_value(value, &mut out[offset..offset + size]).expect("buffer sized for this value");
        offset += size;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn literal_one_round_trips() {
        let payload = encode(&[Value::Int(1)]);
        assert_eq!(payload, vec![0x02, 0x09]);
        let record = Record::parse(&payload).unwrap();
        assert_eq!(record.column_count(), 1);
        assert_eq!(record.column(0).unwrap(), Value::Int(1));
    }

    #[test]
    fn mixed_row_round_trips() {
        let values = vec![Value::Int(0), Value::Int(1), Value::Real(3.1415), Value::Text(b"Ten"), Value::Null];
        let payload = encode(&values);
        let record = Record::parse(&payload).unwrap();
        assert_eq!(record.columns().unwrap(), values);
    }

    #[test]
    fn text_column_is_zero_copy_into_payload() {
        let values = vec![Value::Text(b"hello")];
        let payload = encode(&values);
        let record = Record::parse(&payload).unwrap();
        match record.column(0).unwrap() {
            Value::Text(s) => assert_eq!(s.as_ptr(), payload[payload.len() - 5..].as_ptr()),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn out_of_range_column_is_invalid_argument() {
        let payload = encode(&[Value::Int(1)]);
        let record = Record::parse(&payload).unwrap();
        assert!(record.column(1).is_err());
    }

    #[test]
    fn large_column_count_pushes_header_len_to_two_byte_varint() {
        let values: Vec<Value> = (0..100).map(Value::Int).collect();
        let payload = encode(&values);
        let record = Record::parse(&payload).unwrap();
        assert_eq!(record.column_count(), 100);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(&record.column(i).unwrap(), v);
        }
    }
}
