//! The top-level client: ties the connection pipeline, metadata cache, and
//! space operations together behind one handle (`spec.md` §2, data flow).

use std::sync::Arc;

use iproto_dsn::Config;
use iproto_errors::{Error, SpaceNotFound};
use iproto_protocol::keys::{body as body_keys, RequestType, VINDEX_ID, VSPACE_ID};
use iproto_protocol::metadata::{parse_index, parse_space};
use iproto_protocol::{Body, ResultMapperFactory, SpaceMetadata};

use crate::connection::Connection;
use crate::space::Space;

/// A connected session (`spec.md` §2). Cheap to clone: internally a handle
/// around a shared [`Connection`].
#[derive(Clone)]
pub struct Client {
    connection: Connection,
    config: Config,
    result_mappers: Arc<ResultMapperFactory>,
}

impl Client {
    /// Opens a TCP connection, completes the greeting/auth handshake, and
    /// returns a `Ready` client. Does not populate the metadata cache yet
    /// (`spec.md` §4.6: "lazy + on-demand").
    pub async fn connect(config: Config) -> Result<Client, Error> {
        let connection = Connection::connect(&config).await?;
        let result_mappers = Arc::new(ResultMapperFactory::new(config.value_mapper().clone()));
        Ok(Client {
            connection,
            config,
            result_mappers,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Resolves `name` against the metadata cache, populating it first if
    /// this is the first lookup on this client.
    pub async fn space(&self, name: &str) -> Result<Space, Error> {
        if !self.connection.metadata().is_populated() {
            self.refresh().await?;
        }
        let metadata = self
            .connection
            .metadata()
            .space_by_name(name)
            .ok_or_else(|| {
                SpaceNotFound {
                    name: name.to_string(),
                }
                .build()
            })?;
        Ok(Space::new(self.connection.clone(), metadata, self.result_mappers.clone()))
    }

    /// Forces a metadata refresh by fully scanning `_vspace` and `_vindex`
    /// (`spec.md` §4.6: "Population").
    pub async fn refresh(&self) -> Result<(), Error> {
        let space_rows = self.full_scan(VSPACE_ID).await?;
        let index_rows = self.full_scan(VINDEX_ID).await?;

        let value_mapper = self.config.value_mapper();
        let spaces: Vec<SpaceMetadata> = space_rows
            .iter()
            .map(|row| parse_space(value_mapper, row))
            .collect::<Result<_, _>>()?;
        let indexes = index_rows
            .iter()
            .map(|row| parse_index(value_mapper, row))
            .collect::<Result<_, _>>()?;

        self.connection.metadata().install(spaces, indexes);
        Ok(())
    }

    async fn full_scan(&self, space_id: u32) -> Result<Vec<rmpv::Value>, Error> {
        let body: Body = vec![
            (body_keys::SPACE_ID, rmpv::Value::from(space_id)),
            (body_keys::INDEX_ID, rmpv::Value::from(0u32)),
            (body_keys::LIMIT, rmpv::Value::from(u32::MAX)),
            (body_keys::OFFSET, rmpv::Value::from(0u32)),
            (body_keys::ITERATOR, rmpv::Value::from(0u32)),
            (body_keys::KEY, rmpv::Value::Array(vec![])),
        ];
        let data = self.connection.dispatch(RequestType::Select, body).await?;
        Ok(data.as_array().cloned().unwrap_or_default())
    }

    /// `spec.md` §5: "Close discipline".
    pub async fn close(&self) {
        self.connection.close().await;
    }
}
