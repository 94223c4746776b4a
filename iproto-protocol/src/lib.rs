//! Wire format layer: frame decode/encode, header/body key constants, the
//! greeting parser, space/index metadata parsing, and the MessagePack
//! object/value mapper. Runtime-agnostic, nothing here depends on tokio.

pub mod frame;
pub mod greeting;
pub mod keys;
pub mod metadata;
pub mod value;

pub use frame::{try_decode_frame, Body, FrameHeader};
pub use greeting::{parse_greeting, Greeting};
pub use keys::RequestType;
pub use metadata::{FieldFormat, IndexMetadata, IndexPart, SpaceMetadata};
pub use value::{Decimal, ObjectMapper, ResultMapper, ResultMapperFactory, TupleDecode, ValueMapper, ValueVariant};
