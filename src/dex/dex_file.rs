/* Dex file format structures */

use crate::dex::error::DexError;
use crate::dex::{read_u1, read_u2, read_u4, read_uleb128, read_x};
use bitflags::bitflags;
use log::warn;

/* Constants */
pub const DEX_FILE_MAGIC: [u8; 4] = [0x64, 0x65, 0x78, 0x0a]; // "dex\n"
pub const NO_INDEX: u32 = 0xffffffff;
pub const HEADER_SIZE: usize = 0x70;

bitflags! {
    /// DEX access_flags word, shared by classes and methods.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const TRANSIENT = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, DexError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DexError::TruncatedHeader);
        }

        let magic = <[u8; 8]>::try_from(read_x(bytes, ix, 8)?).map_err(|_| DexError::TruncatedHeader)?;
        if magic[0..4] != DEX_FILE_MAGIC {
            return Err(DexError::BadMagic);
        }

        Ok(Header {
            magic,
            checksum: read_u4(bytes, ix)?,
            signature: <[u8; 20]>::try_from(read_x(bytes, ix, 20)?)
                .map_err(|_| DexError::TruncatedHeader)?,
            file_size: read_u4(bytes, ix)?,
            header_size: read_u4(bytes, ix)?,
            endian_tag: read_u4(bytes, ix)?,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
        })
    }
}

/// Reads a string_data_item: uleb128 utf16_size, then MUTF-8 payload up to
/// the NUL terminator. Bad payloads decode lossily, never fatally.
fn read_string_data(bytes: &[u8], ix: &mut usize) -> String {
    let _utf16_size = read_uleb128(bytes, ix);
    let mut v = vec![];

    while let Ok(u) = read_u1(bytes, ix) {
        if u != 0 {
            v.push(u);
        } else {
            break;
        }
    }

    match cesu8::from_java_cesu8(v.as_slice()) {
        Ok(converted) => converted.to_string(),
        _ => String::from_utf8_lossy(&v).into_owned(),
    }
}

/// Converts a JNI class descriptor (`Lcom/example/Foo;`) into a Java class
/// name (`com.example.Foo`). Primitive and array descriptors pass through.
pub fn jni_to_java(descriptor: &str) -> String {
    if let Some(inner) = descriptor.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        inner.replace('/', ".")
    } else {
        descriptor.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProtoItem {
    // The proto_id_item struct, minus the shorty we never consult
    return_type_idx: u32,
    parameter_type_idxs: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MethodItem {
    // The method_id_item struct
    proto_idx: u16,
    name_idx: u32,
}

impl MethodItem {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodItem, DexError> {
        let _class_idx = read_u2(bytes, ix)?;
        Ok(MethodItem {
            proto_idx: read_u2(bytes, ix)?,
            name_idx: read_u4(bytes, ix)?,
        })
    }
}

/// Instruction stream and register bookkeeping of one method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub insns: Vec<u16>,
}

impl Code {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<Code, DexError> {
        let registers_size = read_u2(bytes, ix)?;
        let ins_size = read_u2(bytes, ix)?;
        let outs_size = read_u2(bytes, ix)?;
        let _tries_size = read_u2(bytes, ix)?;
        let _debug_info_off = read_u4(bytes, ix)?;

        let insns_size = read_u4(bytes, ix)? as usize;
        let available = (bytes.len().saturating_sub(*ix)) / 2;
        let take = if insns_size > available {
            warn!(
                "[code] insns_size {} exceeds remaining image ({} units), truncating",
                insns_size, available
            );
            available
        } else {
            insns_size
        };

        let mut insns = Vec::with_capacity(take);
        for _ in 0..take {
            insns.push(read_u2(bytes, ix)?);
        }

        Ok(Code { registers_size, ins_size, outs_size, insns })
    }
}

/// A resolved method: real name and JNI descriptor joined from the
/// method_id / proto_id tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    pub descriptor: String,
    pub access_flags: AccessFlags,
    pub code: Option<Code>,
}

/// One class from a parsed image: Java-form name, superclass, and its
/// direct/virtual method lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub name: String,
    pub superclass: Option<String>,
    pub access_flags: AccessFlags,
    pub direct_methods: Vec<Method>,
    pub virtual_methods: Vec<Method>,
}

impl ClassDef {
    /// Finds a method by name and descriptor, virtual methods first.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.virtual_methods
            .iter()
            .chain(self.direct_methods.iter())
            .find(|m| m.name == name && m.descriptor == descriptor)
    }
}

/// The decoded index tables and class table of a single DEX image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDex {
    pub header: Header,
    pub strings: Vec<String>,
    pub types: Vec<u32>,
    pub classes: Vec<ClassDef>,
}

impl ParsedDex {
    /// Resolves a type table entry to its descriptor string.
    pub fn type_desc(&self, type_idx: usize) -> Option<&str> {
        let string_idx = *self.types.get(type_idx)? as usize;
        self.strings.get(string_idx).map(|s| s.as_str())
    }
}

/// Parses one DEX image. Only a missing/invalid header is fatal; every table
/// read past that point is bounds-checked and degrades to a partial result.
pub fn parse(bytes: &[u8]) -> Result<ParsedDex, DexError> {
    let mut ix = 0;
    let header = Header::read(bytes, &mut ix)?;

    let strings = read_strings(bytes, &header);
    let types = read_types(bytes, &header, strings.len());
    let protos = read_protos(bytes, &header);
    let methods = read_method_ids(bytes, &header);
    let tables = Tables { strings, types, protos, methods };
    let classes = read_class_defs(bytes, &header, &tables);

    Ok(ParsedDex {
        header,
        strings: tables.strings,
        types: tables.types,
        classes,
    })
}

struct Tables {
    strings: Vec<String>,
    types: Vec<u32>,
    protos: Vec<ProtoItem>,
    methods: Vec<MethodItem>,
}

impl Tables {
    fn string(&self, idx: usize) -> Option<&str> {
        self.strings.get(idx).map(|s| s.as_str())
    }

    fn type_desc(&self, type_idx: usize) -> Option<&str> {
        self.string(*self.types.get(type_idx)? as usize)
    }

    /// Joins a proto_id_item into a JNI descriptor like `(Landroid/os/Bundle;)V`.
    fn descriptor(&self, proto_idx: usize) -> Option<String> {
        let proto = self.protos.get(proto_idx)?;
        let mut s = String::from("(");
        for p in &proto.parameter_type_idxs {
            s.push_str(self.type_desc(*p as usize)?);
        }
        s.push(')');
        s.push_str(self.type_desc(proto.return_type_idx as usize)?);
        Some(s)
    }
}

fn read_strings(bytes: &[u8], header: &Header) -> Vec<String> {
    let mut strings = Vec::with_capacity(header.string_ids_size as usize);
    let mut ix = header.string_ids_off as usize;
    for n in 0..header.string_ids_size {
        let offset = match read_u4(bytes, &mut ix) {
            Ok(o) => o as usize,
            Err(e) => {
                warn!("[dex] string_ids table ends early at entry {n}: {e}");
                break;
            }
        };
        if offset >= bytes.len() {
            warn!("[dex] string #{n} data offset 0x{offset:x} out of bounds, using empty");
            strings.push(String::new());
            continue;
        }
        let mut data_ix = offset;
        strings.push(read_string_data(bytes, &mut data_ix));
    }
    strings
}

fn read_types(bytes: &[u8], header: &Header, string_count: usize) -> Vec<u32> {
    let mut types = Vec::with_capacity(header.type_ids_size as usize);
    let mut ix = header.type_ids_off as usize;
    for n in 0..header.type_ids_size {
        match read_u4(bytes, &mut ix) {
            Ok(string_idx) => {
                if (string_idx as usize) >= string_count {
                    warn!("[dex] type #{n} references missing string {string_idx}");
                }
                types.push(string_idx);
            }
            Err(e) => {
                warn!("[dex] type_ids table ends early at entry {n}: {e}");
                break;
            }
        }
    }
    types
}

fn read_protos(bytes: &[u8], header: &Header) -> Vec<ProtoItem> {
    let mut protos = Vec::with_capacity(header.proto_ids_size as usize);
    let mut ix = header.proto_ids_off as usize;
    for n in 0..header.proto_ids_size {
        let item = (|| -> Result<ProtoItem, DexError> {
            let _shorty_idx = read_u4(bytes, &mut ix)?;
            let return_type_idx = read_u4(bytes, &mut ix)?;
            let mut parameters_off = read_u4(bytes, &mut ix)? as usize;
            let parameter_type_idxs = if parameters_off == 0 {
                vec![]
            } else {
                read_type_list(bytes, &mut parameters_off)?
            };
            Ok(ProtoItem { return_type_idx, parameter_type_idxs })
        })();
        match item {
            Ok(p) => protos.push(p),
            Err(e) => {
                warn!("[dex] proto_ids table ends early at entry {n}: {e}");
                break;
            }
        }
    }
    protos
}

fn read_type_list(bytes: &[u8], ix: &mut usize) -> Result<Vec<u16>, DexError> {
    let size = read_u4(bytes, ix)?;
    // A type_list longer than the image is a corrupt count
    if size as usize > bytes.len() / 2 {
        return Err(DexError::Truncated { what: "type_list", offset: *ix });
    }
    let mut v = Vec::with_capacity(size as usize);
    for _ in 0..size {
        v.push(read_u2(bytes, ix)?);
    }
    Ok(v)
}

fn read_method_ids(bytes: &[u8], header: &Header) -> Vec<MethodItem> {
    let mut methods = Vec::with_capacity(header.method_ids_size as usize);
    let mut ix = header.method_ids_off as usize;
    for n in 0..header.method_ids_size {
        match MethodItem::read(bytes, &mut ix) {
            Ok(m) => methods.push(m),
            Err(e) => {
                warn!("[dex] method_ids table ends early at entry {n}: {e}");
                break;
            }
        }
    }
    methods
}

fn read_class_defs(bytes: &[u8], header: &Header, tables: &Tables) -> Vec<ClassDef> {
    let mut classes = Vec::with_capacity(header.class_defs_size as usize);
    let mut ix = header.class_defs_off as usize;
    for n in 0..header.class_defs_size {
        // class_def_item is a fixed 32-byte record
        let def = (|| -> Result<(u32, u32, u32, u32), DexError> {
            let class_idx = read_u4(bytes, &mut ix)?;
            let access_flags = read_u4(bytes, &mut ix)?;
            let superclass_idx = read_u4(bytes, &mut ix)?;
            let _interfaces_off = read_u4(bytes, &mut ix)?;
            let _source_file_idx = read_u4(bytes, &mut ix)?;
            let _annotations_off = read_u4(bytes, &mut ix)?;
            let class_data_off = read_u4(bytes, &mut ix)?;
            let _static_values_off = read_u4(bytes, &mut ix)?;
            Ok((class_idx, access_flags, superclass_idx, class_data_off))
        })();

        let (class_idx, access_flags, superclass_idx, class_data_off) = match def {
            Ok(d) => d,
            Err(e) => {
                warn!("[dex] class_defs table ends early at entry {n}: {e}");
                break;
            }
        };

        let name = match tables.type_desc(class_idx as usize) {
            Some(desc) => jni_to_java(desc),
            None => {
                warn!("[dex] class #{n} references missing type {class_idx}, skipping");
                continue;
            }
        };
        let superclass = if superclass_idx == NO_INDEX {
            None
        } else {
            tables.type_desc(superclass_idx as usize).map(jni_to_java)
        };

        let (direct_methods, virtual_methods) = if class_data_off > 0 {
            let mut data_ix = class_data_off as usize;
            read_class_data(bytes, &mut data_ix, tables, &name)
        } else {
            (vec![], vec![])
        };

        classes.push(ClassDef {
            name,
            superclass,
            access_flags: AccessFlags::from_bits_retain(access_flags),
            direct_methods,
            virtual_methods,
        });
    }
    classes
}

/// Parses a class_data_item: four uleb128 counts followed by delta-encoded
/// field and method entries. Field entries are consumed but not modeled.
fn read_class_data(
    bytes: &[u8],
    ix: &mut usize,
    tables: &Tables,
    class_name: &str,
) -> (Vec<Method>, Vec<Method>) {
    let static_fields_size = read_uleb128(bytes, ix);
    let instance_fields_size = read_uleb128(bytes, ix);
    let direct_methods_size = read_uleb128(bytes, ix);
    let virtual_methods_size = read_uleb128(bytes, ix);

    for _ in 0..static_fields_size.saturating_add(instance_fields_size) {
        let _field_idx_delta = read_uleb128(bytes, ix);
        let _access_flags = read_uleb128(bytes, ix);
        if *ix >= bytes.len() {
            warn!("[dex] class data of {class_name} truncated in field list");
            return (vec![], vec![]);
        }
    }

    let direct_methods = read_encoded_methods(bytes, ix, direct_methods_size, tables, class_name);
    let virtual_methods = read_encoded_methods(bytes, ix, virtual_methods_size, tables, class_name);
    (direct_methods, virtual_methods)
}

fn read_encoded_methods(
    bytes: &[u8],
    ix: &mut usize,
    count: u32,
    tables: &Tables,
    class_name: &str,
) -> Vec<Method> {
    let mut methods = vec![];
    let mut method_idx: u32 = 0;
    for _ in 0..count {
        if *ix >= bytes.len() {
            warn!("[dex] method list of {class_name} truncated");
            break;
        }
        method_idx = method_idx.wrapping_add(read_uleb128(bytes, ix));
        let access_flags = read_uleb128(bytes, ix);
        let code_off = read_uleb128(bytes, ix) as usize;

        let Some(item) = tables.methods.get(method_idx as usize) else {
            warn!("[dex] {class_name} references missing method id {method_idx}, skipping");
            continue;
        };
        let (Some(name), Some(descriptor)) = (
            tables.string(item.name_idx as usize).map(str::to_string),
            tables.descriptor(item.proto_idx as usize),
        ) else {
            warn!("[dex] method id {method_idx} of {class_name} has unresolvable name/proto");
            continue;
        };

        let code = if code_off > 0 && code_off < bytes.len() {
            let mut code_ix = code_off;
            match Code::read(bytes, &mut code_ix) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("[dex] code item of {class_name}.{name} unreadable: {e}");
                    None
                }
            }
        } else {
            if code_off >= bytes.len() && code_off > 0 {
                warn!("[dex] code offset 0x{code_off:x} of {class_name}.{name} out of bounds");
            }
            None
        };

        methods.push(Method {
            name,
            descriptor,
            access_flags: AccessFlags::from_bits_retain(access_flags),
            code,
        });
    }
    methods
}
