//! Cache module - on-disk cache of upstream resources
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<2 hex>/<30 hex>/.meta        relative path of the payload
//! <root>/<2 hex>/<30 hex>/<name>.<ext> payload, extension from sniffed type
//! ```

mod acquire;
mod cache_key;
mod meta_index;
mod publisher;
mod single_flight;
mod sniff;

pub use acquire::{payload_name, Acquired, Acquirer, Outcome};
pub use cache_key::CacheKey;
pub use meta_index::{MetaIndex, META_FILE};
pub use publisher::{AtomicPublisher, Published, TEMP_PREFIX};
pub use single_flight::{FlightAbandoned, Role, SingleFlight};
pub use sniff::{read_prefix, sniff, ContentValidator, MediaTypes, Sniffed, SNIFF_LEN};
