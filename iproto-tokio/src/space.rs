//! Typed CRUD surface (`spec.md` §4.7), built on top of the connection
//! pipeline's dispatch path.

use std::sync::Arc;

use iproto_errors::{Error, IndexNotFound, ProtocolError};
use iproto_protocol::keys::{body as body_keys, RequestType};
use iproto_protocol::{Body, IndexMetadata, ResultMapperFactory, SpaceMetadata, TupleDecode};

use crate::connection::Connection;

/// Options accepted by [`Space::select`]. Defaults match a full scan of the
/// given index with the server's own default iterator.
#[derive(Debug, Clone, Copy)]
pub struct SelectOptions {
    pub limit: u32,
    pub offset: u32,
    pub iterator: u32,
}

impl Default for SelectOptions {
    fn default() -> Self {
        SelectOptions {
            limit: u32::MAX,
            offset: 0,
            iterator: 0,
        }
    }
}

/// One update operation: `{op-symbol, field-no, argument}` (`spec.md` §4.7).
#[derive(Debug, Clone)]
pub struct UpdateOp {
    pub op: char,
    pub field_no: u32,
    pub argument: rmpv::Value,
}

impl UpdateOp {
    pub fn new(op: char, field_no: u32, argument: impl Into<rmpv::Value>) -> Self {
        UpdateOp {
            op,
            field_no,
            argument: argument.into(),
        }
    }

    fn encode(&self) -> rmpv::Value {
        rmpv::Value::Array(vec![
            rmpv::Value::from(self.op.to_string()),
            rmpv::Value::from(self.field_no),
            self.argument.clone(),
        ])
    }
}

/// An index, named or identified by its numeric id (`spec.md` §4.6:
/// `getIndexById`/name lookup are both exposed on the metadata cache).
#[derive(Debug, Clone)]
pub enum IndexRef {
    Name(String),
    Id(u32),
}

impl From<&str> for IndexRef {
    fn from(name: &str) -> Self {
        IndexRef::Name(name.to_string())
    }
}

impl From<String> for IndexRef {
    fn from(name: String) -> Self {
        IndexRef::Name(name)
    }
}

impl From<u32> for IndexRef {
    fn from(index_id: u32) -> Self {
        IndexRef::Id(index_id)
    }
}

/// A handle to one space, resolved against the metadata cache at
/// construction time (`spec.md` §4.7). Must not outlive the [`Connection`]
/// it borrows from (`spec.md` §3: "Ownership").
pub struct Space {
    connection: Connection,
    metadata: Arc<SpaceMetadata>,
    result_mappers: Arc<ResultMapperFactory>,
}

impl Space {
    pub(crate) fn new(
        connection: Connection,
        metadata: Arc<SpaceMetadata>,
        result_mappers: Arc<ResultMapperFactory>,
    ) -> Self {
        Space {
            connection,
            metadata,
            result_mappers,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    fn resolve_index(&self, index: impl Into<IndexRef>) -> Result<Arc<IndexMetadata>, Error> {
        let index = index.into();
        let found = match &index {
            IndexRef::Name(name) => self.connection.metadata().index_by_name(self.metadata.space_id, name),
            IndexRef::Id(index_id) => self.connection.metadata().index_by_id(self.metadata.space_id, *index_id),
        };
        found.ok_or_else(|| {
            let index = match index {
                IndexRef::Name(name) => name,
                IndexRef::Id(index_id) => index_id.to_string(),
            };
            IndexNotFound {
                space: self.metadata.name.clone(),
                index,
            }
            .build()
        })
    }

    fn check_key_arity(&self, index: &IndexMetadata, key: &[rmpv::Value]) -> Result<(), Error> {
        if key.len() > index.parts.len() {
            return ProtocolError {
                message: format!(
                    "key has {} part(s) but index {:?} only has {}",
                    key.len(),
                    index.name,
                    index.parts.len()
                ),
            }
            .fail();
        }
        Ok(())
    }

    fn decode_data<T: TupleDecode + Send + Sync + 'static>(&self, value: rmpv::Value) -> Result<Vec<T>, Error> {
        let tuples = value.as_array().cloned().unwrap_or_default();
        let mapper = self.result_mappers.get::<T>();
        mapper.decode_many(&tuples)
    }

    pub async fn select<T: TupleDecode + Send + Sync + 'static>(
        &self,
        index: impl Into<IndexRef>,
        key: Vec<rmpv::Value>,
        options: SelectOptions,
    ) -> Result<Vec<T>, Error> {
        let index_meta = self.resolve_index(index)?;
        self.check_key_arity(&index_meta, &key)?;

        let body: Body = vec![
            (body_keys::SPACE_ID, rmpv::Value::from(self.metadata.space_id)),
            (body_keys::INDEX_ID, rmpv::Value::from(index_meta.index_id)),
            (body_keys::LIMIT, rmpv::Value::from(options.limit)),
            (body_keys::OFFSET, rmpv::Value::from(options.offset)),
            (body_keys::ITERATOR, rmpv::Value::from(options.iterator)),
            (body_keys::KEY, rmpv::Value::Array(key)),
        ];
        let data = self.connection.dispatch(RequestType::Select, body).await?;
        self.decode_data(data)
    }

    pub async fn insert<T: TupleDecode + Send + Sync + 'static>(&self, tuple: Vec<rmpv::Value>) -> Result<Vec<T>, Error> {
        let body: Body = vec![
            (body_keys::SPACE_ID, rmpv::Value::from(self.metadata.space_id)),
            (body_keys::TUPLE, rmpv::Value::Array(tuple)),
        ];
        let data = self.connection.dispatch(RequestType::Insert, body).await?;
        self.decode_data(data)
    }

    pub async fn replace<T: TupleDecode + Send + Sync + 'static>(&self, tuple: Vec<rmpv::Value>) -> Result<Vec<T>, Error> {
        let body: Body = vec![
            (body_keys::SPACE_ID, rmpv::Value::from(self.metadata.space_id)),
            (body_keys::TUPLE, rmpv::Value::Array(tuple)),
        ];
        let data = self.connection.dispatch(RequestType::Replace, body).await?;
        self.decode_data(data)
    }

    pub async fn update<T: TupleDecode + Send + Sync + 'static>(
        &self,
        index: impl Into<IndexRef>,
        key: Vec<rmpv::Value>,
        ops: Vec<UpdateOp>,
    ) -> Result<Vec<T>, Error> {
        let index_meta = self.resolve_index(index)?;
        self.check_key_arity(&index_meta, &key)?;
        validate_ops(&ops)?;

        let body: Body = vec![
            (body_keys::SPACE_ID, rmpv::Value::from(self.metadata.space_id)),
            (body_keys::INDEX_ID, rmpv::Value::from(index_meta.index_id)),
            (body_keys::KEY, rmpv::Value::Array(key)),
            (
                body_keys::TUPLE,
                rmpv::Value::Array(ops.iter().map(UpdateOp::encode).collect()),
            ),
        ];
        let data = self.connection.dispatch(RequestType::Update, body).await?;
        self.decode_data(data)
    }

    pub async fn delete<T: TupleDecode + Send + Sync + 'static>(
        &self,
        index: impl Into<IndexRef>,
        key: Vec<rmpv::Value>,
    ) -> Result<Vec<T>, Error> {
        let index_meta = self.resolve_index(index)?;
        self.check_key_arity(&index_meta, &key)?;

        let body: Body = vec![
            (body_keys::SPACE_ID, rmpv::Value::from(self.metadata.space_id)),
            (body_keys::INDEX_ID, rmpv::Value::from(index_meta.index_id)),
            (body_keys::KEY, rmpv::Value::Array(key)),
        ];
        let data = self.connection.dispatch(RequestType::Delete, body).await?;
        self.decode_data(data)
    }

    pub async fn upsert<T: TupleDecode + Send + Sync + 'static>(
        &self,
        tuple: Vec<rmpv::Value>,
        ops: Vec<UpdateOp>,
    ) -> Result<Vec<T>, Error> {
        validate_ops(&ops)?;

        let body: Body = vec![
            (body_keys::SPACE_ID, rmpv::Value::from(self.metadata.space_id)),
            (body_keys::TUPLE, rmpv::Value::Array(tuple)),
            (
                body_keys::OPS,
                rmpv::Value::Array(ops.iter().map(UpdateOp::encode).collect()),
            ),
        ];
        let data = self.connection.dispatch(RequestType::Upsert, body).await?;
        self.decode_data(data)
    }
}

fn validate_ops(ops: &[UpdateOp]) -> Result<(), Error> {
    if ops.is_empty() {
        return ProtocolError {
            message: "update/upsert requires at least one operation".to_string(),
        }
        .fail();
    }
    Ok(())
}
