//! Typed register value and the `assign` coercion rules.

/// A tagged variant over the value kinds the register store can hold.
/// `Real16` has no native half-precision type in the std library, so it is
/// represented as `f32` here; truncation to 16 bits happens only when the
/// DSDL encoder (out of scope for this crate) serializes it onto the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Empty,
    Bit(Vec<bool>),
    Integer8(Vec<i8>),
    Integer16(Vec<i16>),
    Integer32(Vec<i32>),
    Integer64(Vec<i64>),
    Natural8(Vec<u8>),
    Natural16(Vec<u16>),
    Natural32(Vec<u32>),
    Natural64(Vec<u64>),
    Real16(Vec<f32>),
    Real32(Vec<f32>),
    Real64(Vec<f64>),
    String(String),
    Unstructured(Vec<u8>),
}

impl Value {
    pub fn natural16(v: u16) -> Self {
        Value::Natural16(vec![v])
    }

    pub fn as_natural16(&self) -> Option<u16> {
        match self {
            Value::Natural16(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_unstructured(&self) -> Option<&[u8]> {
        match self {
            Value::Unstructured(b) => Some(b.as_slice()),
            _ => None,
        }
    }
}

/// Attempt to coerce `src` into `dst` in place, per the register `assign`
/// rules: empty destinations accept anything, strings/unstructured bytes
/// replace wholesale, same-shape variants copy the overlapping prefix
/// element-wise, anything else fails leaving `dst` untouched.
pub fn assign(dst: &mut Value, src: &Value) -> Result<(), ()> {
    if matches!(dst, Value::Empty) {
        *dst = src.clone();
        return Ok(());
    }

    match (dst, src) {
        (Value::String(d), Value::String(s)) => {
            *d = s.clone();
            Ok(())
        }
        (Value::Unstructured(d), Value::Unstructured(s)) => {
            *d = s.clone();
            Ok(())
        }
        (Value::Bit(d), Value::Bit(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Integer8(d), Value::Integer8(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Integer16(d), Value::Integer16(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Integer32(d), Value::Integer32(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Integer64(d), Value::Integer64(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Natural8(d), Value::Natural8(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Natural16(d), Value::Natural16(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Natural32(d), Value::Natural32(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Natural64(d), Value::Natural64(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Real16(d), Value::Real16(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Real32(d), Value::Real32(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        (Value::Real64(d), Value::Real64(s)) => {
            copy_prefix(d, s);
            Ok(())
        }
        _ => Err(()),
    }
}

fn copy_prefix<T: Copy>(dst: &mut [T], src: &[T]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

/// A minimal, private binary encoding used only to persist register values
/// to the KV store; it is not the DSDL wire format.
pub fn serialize(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        Value::Empty => out.push(0),
        Value::Bit(v) => {
            out.push(1);
            out.extend(v.iter().map(|b| *b as u8));
        }
        Value::Integer8(v) => {
            out.push(2);
            out.extend(v.iter().map(|x| *x as u8));
        }
        Value::Integer16(v) => {
            out.push(3);
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Integer32(v) => {
            out.push(4);
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Integer64(v) => {
            out.push(5);
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Natural8(v) => {
            out.push(6);
            out.extend_from_slice(v);
        }
        Value::Natural16(v) => {
            out.push(7);
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Natural32(v) => {
            out.push(8);
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Natural64(v) => {
            out.push(9);
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Real16(v) | Value::Real32(v) => {
            out.push(if matches!(value, Value::Real16(_)) { 10 } else { 11 });
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::Real64(v) => {
            out.push(12);
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::String(s) => {
            out.push(13);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Unstructured(b) => {
            out.push(14);
            out.extend_from_slice(b);
        }
    }
    out
}

pub fn deserialize(bytes: &[u8]) -> Option<Value> {
    let (&tag, rest) = bytes.split_first()?;
    match tag {
        0 => Some(Value::Empty),
        1 => Some(Value::Bit(rest.iter().map(|b| *b != 0).collect())),
        2 => Some(Value::Integer8(rest.iter().map(|b| *b as i8).collect())),
        3 => Some(Value::Integer16(chunks(rest, i16::from_le_bytes)?)),
        4 => Some(Value::Integer32(chunks(rest, i32::from_le_bytes)?)),
        5 => Some(Value::Integer64(chunks(rest, i64::from_le_bytes)?)),
        6 => Some(Value::Natural8(rest.to_vec())),
        7 => Some(Value::Natural16(chunks(rest, u16::from_le_bytes)?)),
        8 => Some(Value::Natural32(chunks(rest, u32::from_le_bytes)?)),
        9 => Some(Value::Natural64(chunks(rest, u64::from_le_bytes)?)),
        10 => Some(Value::Real16(chunks(rest, f32::from_le_bytes)?)),
        11 => Some(Value::Real32(chunks(rest, f32::from_le_bytes)?)),
        12 => Some(Value::Real64(chunks(rest, f64::from_le_bytes)?)),
        13 => Some(Value::String(String::from_utf8(rest.to_vec()).ok()?)),
        14 => Some(Value::Unstructured(rest.to_vec())),
        _ => None,
    }
}

fn chunks<const N: usize, T>(bytes: &[u8], from_le: impl Fn([u8; N]) -> T) -> Option<Vec<T>> {
    if bytes.len() % N != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(N)
            .map(|c| from_le(c.try_into().unwrap()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_destination_accepts_anything() {
        let mut dst = Value::Empty;
        assign(&mut dst, &Value::natural16(42)).unwrap();
        assert_eq!(dst, Value::natural16(42));
    }

    #[test]
    fn string_replaces_wholesale() {
        let mut dst = Value::String("old".into());
        assign(&mut dst, &Value::String("new".into())).unwrap();
        assert_eq!(dst, Value::String("new".into()));
    }

    #[test]
    fn same_numeric_variant_copies_prefix() {
        let mut dst = Value::Natural8(vec![0, 0, 0]);
        assign(&mut dst, &Value::Natural8(vec![9, 9])).unwrap();
        assert_eq!(dst, Value::Natural8(vec![9, 9, 0]));
    }

    #[test]
    fn mismatched_variant_fails_and_leaves_dst_unchanged() {
        let mut dst = Value::Natural8(vec![1]);
        let err = assign(&mut dst, &Value::String("x".into()));
        assert!(err.is_err());
        assert_eq!(dst, Value::Natural8(vec![1]));
    }

    #[test]
    fn value_round_trips_through_serialize() {
        let v = Value::String("uavcan".into());
        let bytes = serialize(&v);
        assert_eq!(deserialize(&bytes).unwrap(), v);
    }
}
