//! Who holds which file: the remote directory cache and the resolver
//! that combines it with the live local listing.

pub mod cache;
pub mod resolver;

pub use cache::{DirectoryCache, Listing, ListingSource};
pub use resolver::{LocateResult, LocationResolver, Source};
