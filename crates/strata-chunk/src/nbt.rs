//! Little-endian tag-tree codec, enough for subchunk palette compounds.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{self, Read, Write};

const MAX_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    End,
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<Tag>),
    Compound(HashMap<String, Tag>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_len<R: Read>(reader: &mut R) -> io::Result<usize> {
    let len = reader.read_i32::<LittleEndian>()?;
    usize::try_from(len).map_err(|_| invalid(format!("negative length {}", len)))
}

fn read_string<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u16::<LittleEndian>()?;
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| invalid("string longer than 65535 bytes"))?;
    writer.write_u16::<LittleEndian>(len)?;
    writer.write_all(s.as_bytes())
}

impl Tag {
    pub fn type_id(&self) -> u8 {
        match self {
            Tag::End => 0,
            Tag::Byte(_) => 1,
            Tag::Short(_) => 2,
            Tag::Int(_) => 3,
            Tag::Long(_) => 4,
            Tag::Float(_) => 5,
            Tag::Double(_) => 6,
            Tag::ByteArray(_) => 7,
            Tag::String(_) => 8,
            Tag::List(_) => 9,
            Tag::Compound(_) => 10,
            Tag::IntArray(_) => 11,
            Tag::LongArray(_) => 12,
        }
    }

    /// Reads one named tag. A bare end byte yields `("", Tag::End)`.
    pub fn read<R: Read>(reader: &mut R) -> io::Result<(String, Tag)> {
        Self::read_named(reader, 0)
    }

    fn read_named<R: Read>(reader: &mut R, depth: usize) -> io::Result<(String, Tag)> {
        let type_id = reader.read_u8()?;
        if type_id == 0 {
            return Ok((String::new(), Tag::End));
        }
        let name = read_string(reader)?;
        let tag = Self::read_payload(reader, type_id, depth)?;
        Ok((name, tag))
    }

    fn read_payload<R: Read>(reader: &mut R, type_id: u8, depth: usize) -> io::Result<Tag> {
        if depth > MAX_DEPTH {
            return Err(invalid("tag nesting too deep"));
        }
        match type_id {
            0 => Ok(Tag::End),
            1 => Ok(Tag::Byte(reader.read_i8()?)),
            2 => Ok(Tag::Short(reader.read_i16::<LittleEndian>()?)),
            3 => Ok(Tag::Int(reader.read_i32::<LittleEndian>()?)),
            4 => Ok(Tag::Long(reader.read_i64::<LittleEndian>()?)),
            5 => Ok(Tag::Float(reader.read_f32::<LittleEndian>()?)),
            6 => Ok(Tag::Double(reader.read_f64::<LittleEndian>()?)),
            7 => {
                let len = read_len(reader)?;
                let mut bytes = Vec::new();
                for _ in 0..len {
                    bytes.push(reader.read_i8()?);
                }
                Ok(Tag::ByteArray(bytes))
            }
            8 => read_string(reader).map(Tag::String),
            9 => {
                let list_type = reader.read_u8()?;
                let len = read_len(reader)?;
                if list_type == 0 && len > 0 {
                    return Err(invalid("non-empty list of end tags"));
                }
                let mut list = Vec::new();
                for _ in 0..len {
                    list.push(Self::read_payload(reader, list_type, depth + 1)?);
                }
                Ok(Tag::List(list))
            }
            10 => {
                let mut compound = HashMap::new();
                loop {
                    let (name, tag) = Self::read_named(reader, depth + 1)?;
                    if let Tag::End = tag {
                        break;
                    }
                    compound.insert(name, tag);
                }
                Ok(Tag::Compound(compound))
            }
            11 => {
                let len = read_len(reader)?;
                let mut ints = Vec::new();
                for _ in 0..len {
                    ints.push(reader.read_i32::<LittleEndian>()?);
                }
                Ok(Tag::IntArray(ints))
            }
            12 => {
                let len = read_len(reader)?;
                let mut longs = Vec::new();
                for _ in 0..len {
                    longs.push(reader.read_i64::<LittleEndian>()?);
                }
                Ok(Tag::LongArray(longs))
            }
            _ => Err(invalid(format!("invalid tag type {}", type_id))),
        }
    }

    pub fn write<W: Write>(&self, writer: &mut W, name: &str) -> io::Result<()> {
        writer.write_u8(self.type_id())?;
        if !matches!(self, Tag::End) {
            write_string(writer, name)?;
        }
        self.write_payload(writer)
    }

    fn write_payload<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Tag::End => Ok(()),
            Tag::Byte(v) => writer.write_i8(*v),
            Tag::Short(v) => writer.write_i16::<LittleEndian>(*v),
            Tag::Int(v) => writer.write_i32::<LittleEndian>(*v),
            Tag::Long(v) => writer.write_i64::<LittleEndian>(*v),
            Tag::Float(v) => writer.write_f32::<LittleEndian>(*v),
            Tag::Double(v) => writer.write_f64::<LittleEndian>(*v),
            Tag::ByteArray(v) => {
                writer.write_i32::<LittleEndian>(v.len() as i32)?;
                for &b in v {
                    writer.write_i8(b)?;
                }
                Ok(())
            }
            Tag::String(v) => write_string(writer, v),
            Tag::List(v) => {
                writer.write_u8(v.first().map_or(0, Tag::type_id))?;
                writer.write_i32::<LittleEndian>(v.len() as i32)?;
                for tag in v {
                    tag.write_payload(writer)?;
                }
                Ok(())
            }
            Tag::Compound(v) => {
                // sorted so identical compounds encode to identical bytes
                let mut entries: Vec<_> = v.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                for (name, tag) in entries {
                    tag.write(writer, name)?;
                }
                Tag::End.write(writer, "")
            }
            Tag::IntArray(v) => {
                writer.write_i32::<LittleEndian>(v.len() as i32)?;
                for &i in v {
                    writer.write_i32::<LittleEndian>(i)?;
                }
                Ok(())
            }
            Tag::LongArray(v) => {
                writer.write_i32::<LittleEndian>(v.len() as i32)?;
                for &l in v {
                    writer.write_i64::<LittleEndian>(l)?;
                }
                Ok(())
            }
        }
    }

    pub fn as_compound(&self) -> Option<&HashMap<String, Tag>> {
        match self {
            Tag::Compound(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Tag::Byte(v) => Some(v as i32),
            Tag::Short(v) => Some(v as i32),
            Tag::Int(v) => Some(v),
            _ => None,
        }
    }
}
