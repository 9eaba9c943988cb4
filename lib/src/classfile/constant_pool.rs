//! Constant pool handling for both directions: symbolic resolution while
//! reading, deduplicating interning while writing.

use crate::classfile::{ParseError, WriteError};
use crate::tree::insn::{ConstantValue, Handle};
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::HashMap;

/// One parsed constant pool entry.
#[derive(Debug, Clone)]
pub enum CpInfo {
    /// Index 0 and the phantom slots after `Long`/`Double` entries.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

/// Read-side view of a parsed constant pool.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    pub entries: Vec<CpInfo>,
}

impl ConstantPool {
    fn get(&self, index: u16) -> Result<&CpInfo, ParseError> {
        match self.entries.get(index as usize) {
            Some(CpInfo::Unusable) | None => Err(ParseError::InvalidIndex(index)),
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ParseError> {
        match self.get(index)? {
            CpInfo::Utf8(value) => Ok(value.as_str()),
            _ => Err(ParseError::InvalidIndex(index)),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ParseError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.utf8(*name_index),
            _ => Err(ParseError::InvalidIndex(index)),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ParseError> {
        match self.get(index)? {
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ParseError::InvalidIndex(index)),
        }
    }

    /// `(owner, name, desc)` of a `Fieldref`.
    pub fn field_ref(&self, index: u16) -> Result<(&str, &str, &str), ParseError> {
        match self.get(index)? {
            CpInfo::FieldRef {
                class_index,
                name_and_type_index,
            } => {
                let owner = self.class_name(*class_index)?;
                let (name, desc) = self.name_and_type(*name_and_type_index)?;
                Ok((owner, name, desc))
            }
            _ => Err(ParseError::InvalidIndex(index)),
        }
    }

    /// `(owner, name, desc, is_interface)` of a `Methodref` or
    /// `InterfaceMethodref`.
    pub fn method_ref(&self, index: u16) -> Result<(&str, &str, &str, bool), ParseError> {
        match self.get(index)? {
            CpInfo::MethodRef {
                class_index,
                name_and_type_index,
            } => {
                let owner = self.class_name(*class_index)?;
                let (name, desc) = self.name_and_type(*name_and_type_index)?;
                Ok((owner, name, desc, false))
            }
            CpInfo::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => {
                let owner = self.class_name(*class_index)?;
                let (name, desc) = self.name_and_type(*name_and_type_index)?;
                Ok((owner, name, desc, true))
            }
            _ => Err(ParseError::InvalidIndex(index)),
        }
    }

    pub fn handle(&self, index: u16) -> Result<Handle, ParseError> {
        match self.get(index)? {
            CpInfo::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                // field handles point at Fieldref, method handles at
                // (Interface)Methodref
                let (owner, name, desc, interface) = match self.get(*reference_index)? {
                    CpInfo::FieldRef { .. } => {
                        let (owner, name, desc) = self.field_ref(*reference_index)?;
                        (owner, name, desc, false)
                    }
                    _ => self.method_ref(*reference_index)?,
                };
                Ok(Handle {
                    tag: *reference_kind,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    desc: desc.to_string(),
                    interface,
                })
            }
            _ => Err(ParseError::InvalidIndex(index)),
        }
    }

    /// Loadable constant for `LDC`, `ConstantValue` or bootstrap arguments.
    pub fn loadable(&self, index: u16) -> Result<ConstantValue, ParseError> {
        match self.get(index)? {
            CpInfo::Integer(value) => Ok(ConstantValue::Int(*value)),
            CpInfo::Float(value) => Ok(ConstantValue::Float(*value)),
            CpInfo::Long(value) => Ok(ConstantValue::Long(*value)),
            CpInfo::Double(value) => Ok(ConstantValue::Double(*value)),
            CpInfo::String { string_index } => {
                Ok(ConstantValue::String(self.utf8(*string_index)?.to_string()))
            }
            CpInfo::Class { name_index } => {
                Ok(ConstantValue::Class(self.utf8(*name_index)?.to_string()))
            }
            CpInfo::MethodType { descriptor_index } => Ok(ConstantValue::MethodType(
                self.utf8(*descriptor_index)?.to_string(),
            )),
            CpInfo::MethodHandle { .. } => Ok(ConstantValue::MethodHandle(self.handle(index)?)),
            _ => Err(ParseError::InvalidIndex(index)),
        }
    }

    /// `(bootstrap_index, name, desc)` of an `InvokeDynamic` entry.
    pub fn invoke_dynamic(&self, index: u16) -> Result<(u16, &str, &str), ParseError> {
        match self.get(index)? {
            CpInfo::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                let (name, desc) = self.name_and_type(*name_and_type_index)?;
                Ok((*bootstrap_method_attr_index, name, desc))
            }
            _ => Err(ParseError::InvalidIndex(index)),
        }
    }
}

/// Write-side entry; floats are stored as bits so the pool can be a hash key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolKey {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    InvokeDynamic(u16, u16),
}

impl PoolKey {
    fn width(&self) -> u16 {
        match self {
            PoolKey::Long(_) | PoolKey::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Deduplicating constant pool under construction.
#[derive(Debug, Default)]
pub struct ConstantsPool {
    entries: Vec<PoolKey>,
    indices: HashMap<PoolKey, u16>,
    next_index: u16,
}

impl ConstantsPool {
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            entries: vec![],
            indices: HashMap::new(),
            next_index: 1,
        }
    }

    fn intern(&mut self, key: PoolKey) -> Result<u16, WriteError> {
        if let Some(index) = self.indices.get(&key) {
            return Ok(*index);
        }
        let index = self.next_index;
        let width = key.width();
        if (index as u32) + (width as u32) > u16::MAX as u32 {
            return Err(WriteError::PoolOverflow);
        }
        self.next_index += width;
        self.indices.insert(key.clone(), index);
        self.entries.push(key);
        Ok(index)
    }

    pub fn utf8(&mut self, value: &str) -> Result<u16, WriteError> {
        self.intern(PoolKey::Utf8(value.to_string()))
    }

    pub fn integer(&mut self, value: i32) -> Result<u16, WriteError> {
        self.intern(PoolKey::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> Result<u16, WriteError> {
        self.intern(PoolKey::Float(value.to_bits()))
    }

    pub fn long(&mut self, value: i64) -> Result<u16, WriteError> {
        self.intern(PoolKey::Long(value))
    }

    pub fn double(&mut self, value: f64) -> Result<u16, WriteError> {
        self.intern(PoolKey::Double(value.to_bits()))
    }

    pub fn class(&mut self, name: &str) -> Result<u16, WriteError> {
        let name_index = self.utf8(name)?;
        self.intern(PoolKey::Class(name_index))
    }

    pub fn string(&mut self, value: &str) -> Result<u16, WriteError> {
        let string_index = self.utf8(value)?;
        self.intern(PoolKey::String(string_index))
    }

    pub fn name_and_type(&mut self, name: &str, desc: &str) -> Result<u16, WriteError> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(desc)?;
        self.intern(PoolKey::NameAndType(name_index, descriptor_index))
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, desc: &str) -> Result<u16, WriteError> {
        let class_index = self.class(owner)?;
        let nat_index = self.name_and_type(name, desc)?;
        self.intern(PoolKey::FieldRef(class_index, nat_index))
    }

    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        desc: &str,
        interface: bool,
    ) -> Result<u16, WriteError> {
        let class_index = self.class(owner)?;
        let nat_index = self.name_and_type(name, desc)?;
        if interface {
            self.intern(PoolKey::InterfaceMethodRef(class_index, nat_index))
        } else {
            self.intern(PoolKey::MethodRef(class_index, nat_index))
        }
    }

    pub fn method_type(&mut self, desc: &str) -> Result<u16, WriteError> {
        let descriptor_index = self.utf8(desc)?;
        self.intern(PoolKey::MethodType(descriptor_index))
    }

    pub fn method_handle(&mut self, handle: &Handle) -> Result<u16, WriteError> {
        // kinds 1-4 reference fields, the rest methods
        let reference_index = if handle.tag <= 4 {
            self.field_ref(&handle.owner, &handle.name, &handle.desc)?
        } else {
            self.method_ref(&handle.owner, &handle.name, &handle.desc, handle.interface)?
        };
        self.intern(PoolKey::MethodHandle(handle.tag, reference_index))
    }

    pub fn invoke_dynamic(
        &mut self,
        bootstrap_index: u16,
        name: &str,
        desc: &str,
    ) -> Result<u16, WriteError> {
        let nat_index = self.name_and_type(name, desc)?;
        self.intern(PoolKey::InvokeDynamic(bootstrap_index, nat_index))
    }

    pub fn constant(&mut self, value: &ConstantValue) -> Result<u16, WriteError> {
        match value {
            ConstantValue::Int(v) => self.integer(*v),
            ConstantValue::Float(v) => self.float(*v),
            ConstantValue::Long(v) => self.long(*v),
            ConstantValue::Double(v) => self.double(*v),
            ConstantValue::String(v) => self.string(v),
            ConstantValue::Class(v) => self.class(v),
            ConstantValue::MethodType(v) => self.method_type(v),
            ConstantValue::MethodHandle(handle) => self.method_handle(handle),
        }
    }

    /// Number of slots (`constant_pool_count` in the class file header).
    pub fn count(&self) -> u16 {
        self.next_index
    }

    pub fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u16::<BigEndian>(self.next_index)?;
        for entry in &self.entries {
            match entry {
                PoolKey::Utf8(value) => {
                    writer.write_u8(1)?;
                    let bytes = encode_modified_utf8(value);
                    writer.write_u16::<BigEndian>(bytes.len() as u16)?;
                    writer.write_all(&bytes)?;
                }
                PoolKey::Integer(value) => {
                    writer.write_u8(3)?;
                    writer.write_i32::<BigEndian>(*value)?;
                }
                PoolKey::Float(bits) => {
                    writer.write_u8(4)?;
                    writer.write_u32::<BigEndian>(*bits)?;
                }
                PoolKey::Long(value) => {
                    writer.write_u8(5)?;
                    writer.write_i64::<BigEndian>(*value)?;
                }
                PoolKey::Double(bits) => {
                    writer.write_u8(6)?;
                    writer.write_u64::<BigEndian>(*bits)?;
                }
                PoolKey::Class(name_index) => {
                    writer.write_u8(7)?;
                    writer.write_u16::<BigEndian>(*name_index)?;
                }
                PoolKey::String(string_index) => {
                    writer.write_u8(8)?;
                    writer.write_u16::<BigEndian>(*string_index)?;
                }
                PoolKey::FieldRef(class_index, nat_index) => {
                    writer.write_u8(9)?;
                    writer.write_u16::<BigEndian>(*class_index)?;
                    writer.write_u16::<BigEndian>(*nat_index)?;
                }
                PoolKey::MethodRef(class_index, nat_index) => {
                    writer.write_u8(10)?;
                    writer.write_u16::<BigEndian>(*class_index)?;
                    writer.write_u16::<BigEndian>(*nat_index)?;
                }
                PoolKey::InterfaceMethodRef(class_index, nat_index) => {
                    writer.write_u8(11)?;
                    writer.write_u16::<BigEndian>(*class_index)?;
                    writer.write_u16::<BigEndian>(*nat_index)?;
                }
                PoolKey::NameAndType(name_index, descriptor_index) => {
                    writer.write_u8(12)?;
                    writer.write_u16::<BigEndian>(*name_index)?;
                    writer.write_u16::<BigEndian>(*descriptor_index)?;
                }
                PoolKey::MethodHandle(kind, reference_index) => {
                    writer.write_u8(15)?;
                    writer.write_u8(*kind)?;
                    writer.write_u16::<BigEndian>(*reference_index)?;
                }
                PoolKey::MethodType(descriptor_index) => {
                    writer.write_u8(16)?;
                    writer.write_u16::<BigEndian>(*descriptor_index)?;
                }
                PoolKey::InvokeDynamic(bootstrap_index, nat_index) => {
                    writer.write_u8(18)?;
                    writer.write_u16::<BigEndian>(*bootstrap_index)?;
                    writer.write_u16::<BigEndian>(*nat_index)?;
                }
            }
        }
        Ok(())
    }
}

/// Decode the JVM's modified UTF-8 into a Rust string.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ParseError> {
    let mut code_units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte & 0x80 == 0 {
            code_units.push(byte as u16);
            i += 1;
        } else if byte & 0xE0 == 0xC0 {
            if i + 1 >= bytes.len() || bytes[i + 1] & 0xC0 != 0x80 {
                return Err(ParseError::MalformedUtf8);
            }
            let value = (((byte & 0x1F) as u16) << 6) | ((bytes[i + 1] & 0x3F) as u16);
            code_units.push(value);
            i += 2;
        } else if byte & 0xF0 == 0xE0 {
            if i + 2 >= bytes.len()
                || bytes[i + 1] & 0xC0 != 0x80
                || bytes[i + 2] & 0xC0 != 0x80
            {
                return Err(ParseError::MalformedUtf8);
            }
            let value = (((byte & 0x0F) as u16) << 12)
                | (((bytes[i + 1] & 0x3F) as u16) << 6)
                | ((bytes[i + 2] & 0x3F) as u16);
            code_units.push(value);
            i += 3;
        } else {
            return Err(ParseError::MalformedUtf8);
        }
    }
    String::from_utf16(&code_units).map_err(|_| ParseError::MalformedUtf8)
}

/// Encode a Rust string as the JVM's modified UTF-8.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => bytes.push(unit as u8),
            // NUL is encoded in two bytes so it never appears raw
            0x0000 | 0x0080..=0x07FF => {
                bytes.push(0xC0 | ((unit >> 6) as u8 & 0x1F));
                bytes.push(0x80 | (unit as u8 & 0x3F));
            }
            _ => {
                bytes.push(0xE0 | ((unit >> 12) as u8 & 0x0F));
                bytes.push(0x80 | ((unit >> 6) as u8 & 0x3F));
                bytes.push(0x80 | (unit as u8 & 0x3F));
            }
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut pool = ConstantsPool::new();
        let a = pool.class("java/lang/String").unwrap();
        let b = pool.class("java/lang/String").unwrap();
        assert_eq!(a, b);
        // Utf8 + Class
        assert_eq!(pool.count(), 3);
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantsPool::new();
        let first = pool.long(1).unwrap();
        let second = pool.integer(1).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 3);
    }

    #[test]
    fn modified_utf8_round_trip() {
        for s in ["hello", "\u{0}embedded", "ünïcode \u{4e16}"] {
            let encoded = encode_modified_utf8(s);
            assert_eq!(decode_modified_utf8(&encoded).unwrap(), s);
        }
    }
}
