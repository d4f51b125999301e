mod resolver;

pub use resolver::{
  normalize_name, ByCaseInsensitiveName, ByDecodedName, ById, CollectionResolver, LookupRequest, LookupStrategy,
};
