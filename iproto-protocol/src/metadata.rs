//! Space/index metadata records (`spec.md` §3) and their parsing out of the
//! tuples returned by a full scan of the well-known system spaces
//! `_vspace` (281) and `_vindex` (289) (`spec.md` §4.6).
//!
//! The on-wire tuple shape mirrors the server's own system-space layout:
//! `_vspace` rows are `[id, owner, name, engine, field_count, flags,
//! format]` and `_vindex` rows are `[space_id, index_id, name, type, opts,
//! parts]`. Only the fields this client surfaces are decoded; the rest are
//! skipped.

use iproto_errors::{Error, ProtocolError};

use crate::value::ValueMapper;

/// One field of a space's tuple format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFormat {
    pub name: String,
    pub field_type: String,
    pub nullable: bool,
}

/// `spec.md` §3: "Space metadata".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceMetadata {
    pub space_id: u32,
    pub name: String,
    pub engine: String,
    pub fields: Vec<FieldFormat>,
}

/// One part of a composite index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPart {
    pub field_no: u32,
    pub field_type: String,
}

/// `spec.md` §3: "Index metadata".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    pub space_id: u32,
    pub index_id: u32,
    pub name: String,
    pub index_type: String,
    pub unique: bool,
    pub parts: Vec<IndexPart>,
}

fn array_elem<'a>(arr: &'a [rmpv::Value], idx: usize, what: &str) -> Result<&'a rmpv::Value, Error> {
    arr.get(idx).ok_or_else(|| {
        ProtocolError {
            message: format!("metadata tuple missing field {idx} ({what})"),
        }
        .build()
    })
}

/// Parses one row of `_vspace` into a [`SpaceMetadata`].
pub fn parse_space(mapper: &ValueMapper, tuple: &rmpv::Value) -> Result<SpaceMetadata, Error> {
    let arr = tuple.as_array().ok_or_else(|| {
        ProtocolError {
            message: "_vspace row is not an array".to_string(),
        }
        .build()
    })?;

    let space_id: u32 = mapper.convert(array_elem(arr, 0, "space_id")?)?;
    let name: String = mapper.convert(array_elem(arr, 2, "name")?)?;
    let engine: String = mapper.convert(array_elem(arr, 3, "engine")?)?;

    let format_value = array_elem(arr, 6, "format")?;
    let format_arr = format_value.as_array().ok_or_else(|| {
        ProtocolError {
            message: "_vspace format is not an array".to_string(),
        }
        .build()
    })?;

    let mut fields = Vec::with_capacity(format_arr.len());
    for entry in format_arr {
        let map = entry.as_map().ok_or_else(|| {
            ProtocolError {
                message: "_vspace format entry is not a map".to_string(),
            }
            .build()
        })?;
        let mut field_name = None;
        let mut field_type = None;
        let mut nullable = false;
        for (k, v) in map {
            match k.as_str() {
                Some("name") => field_name = Some(mapper.convert::<String>(v)?),
                Some("type") => field_type = Some(mapper.convert::<String>(v)?),
                Some("is_nullable") => nullable = v.as_bool().unwrap_or(false),
                _ => {}
            }
        }
        fields.push(FieldFormat {
            name: field_name.ok_or_else(|| {
                ProtocolError {
                    message: "_vspace format entry missing name".to_string(),
                }
                .build()
            })?,
            field_type: field_type.ok_or_else(|| {
                ProtocolError {
                    message: "_vspace format entry missing type".to_string(),
                }
                .build()
            })?,
            nullable,
        });
    }

    Ok(SpaceMetadata {
        space_id,
        name,
        engine,
        fields,
    })
}

/// Parses one row of `_vindex` into an [`IndexMetadata`].
pub fn parse_index(mapper: &ValueMapper, tuple: &rmpv::Value) -> Result<IndexMetadata, Error> {
    let arr = tuple.as_array().ok_or_else(|| {
        ProtocolError {
            message: "_vindex row is not an array".to_string(),
        }
        .build()
    })?;

    let space_id: u32 = mapper.convert(array_elem(arr, 0, "space_id")?)?;
    let index_id: u32 = mapper.convert(array_elem(arr, 1, "index_id")?)?;
    let name: String = mapper.convert(array_elem(arr, 2, "name")?)?;
    let index_type: String = mapper.convert(array_elem(arr, 3, "type")?)?;

    let opts = array_elem(arr, 4, "opts")?.as_map().ok_or_else(|| {
        ProtocolError {
            message: "_vindex opts is not a map".to_string(),
        }
        .build()
    })?;
    let unique = opts
        .iter()
        .find(|(k, _)| k.as_str() == Some("unique"))
        .and_then(|(_, v)| v.as_bool())
        .unwrap_or(true);

    let parts_arr = array_elem(arr, 5, "parts")?.as_array().ok_or_else(|| {
        ProtocolError {
            message: "_vindex parts is not an array".to_string(),
        }
        .build()
    })?;

    let mut parts = Vec::with_capacity(parts_arr.len());
    for part in parts_arr {
        let part_arr = part.as_array().ok_or_else(|| {
            ProtocolError {
                message: "_vindex part entry is not an array".to_string(),
            }
            .build()
        })?;
        let field_no: u32 = mapper.convert(array_elem(part_arr, 0, "field_no")?)?;
        let field_type: String = mapper.convert(array_elem(part_arr, 1, "field_type")?)?;
        parts.push(IndexPart {
            field_no,
            field_type,
        });
    }

    Ok(IndexMetadata {
        space_id,
        index_id,
        name,
        index_type,
        unique,
        parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_entry(key: &str, value: rmpv::Value) -> (rmpv::Value, rmpv::Value) {
        (rmpv::Value::from(key), value)
    }

    #[test]
    fn parses_a_space_row() {
        let mapper = ValueMapper::default();
        let row = rmpv::Value::Array(vec![
            rmpv::Value::from(512u32),
            rmpv::Value::from(1u32),
            rmpv::Value::from("test"),
            rmpv::Value::from("memtx"),
            rmpv::Value::from(2u32),
            rmpv::Value::Map(vec![]),
            rmpv::Value::Array(vec![rmpv::Value::Map(vec![
                map_entry("name", rmpv::Value::from("id")),
                map_entry("type", rmpv::Value::from("unsigned")),
                map_entry("is_nullable", rmpv::Value::from(false)),
            ])]),
        ]);
        let space = parse_space(&mapper, &row).unwrap();
        assert_eq!(space.space_id, 512);
        assert_eq!(space.name, "test");
        assert_eq!(space.engine, "memtx");
        assert_eq!(space.fields.len(), 1);
        assert_eq!(space.fields[0].name, "id");
        assert!(!space.fields[0].nullable);
    }

    #[test]
    fn parses_an_index_row() {
        let mapper = ValueMapper::default();
        let row = rmpv::Value::Array(vec![
            rmpv::Value::from(512u32),
            rmpv::Value::from(0u32),
            rmpv::Value::from("primary"),
            rmpv::Value::from("tree"),
            rmpv::Value::Map(vec![map_entry("unique", rmpv::Value::from(true))]),
            rmpv::Value::Array(vec![rmpv::Value::Array(vec![
                rmpv::Value::from(0u32),
                rmpv::Value::from("unsigned"),
            ])]),
        ]);
        let index = parse_index(&mapper, &row).unwrap();
        assert_eq!(index.space_id, 512);
        assert_eq!(index.index_id, 0);
        assert_eq!(index.name, "primary");
        assert!(index.unique);
        assert_eq!(index.parts, vec![IndexPart { field_no: 0, field_type: "unsigned".to_string() }]);
    }
}
