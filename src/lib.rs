pub mod error;
pub mod checksum;
pub mod permissions;
pub mod codec;
pub mod droplet;
pub mod io_stream;
pub mod builder;
pub mod verify;
pub mod archive;

pub use error::{DropletError, Result};
pub use codec::{Format, Codec, get_codec};
pub use droplet::{Droplet, DropletHeader};
pub use io_stream::{DropReader, DropWriter};
pub use builder::{build, Builder, BuildOptions, BuildSummary};
pub use verify::{RecordHealth, VerifiedRecord, VerifyReport};
pub use archive::{Archive, ExtractOptions, ExtractSummary, ListEntry};
