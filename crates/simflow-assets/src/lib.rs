#![deny(missing_docs)]
#![doc = "Assets and asset collections: content-addressed files, directory scans and filters."]

pub mod asset;
pub mod collection;
pub mod filters;

pub use asset::{Asset, AssetRecord, AssetSource};
pub use collection::{AssetCollection, AssetQuery, DirectoryOptions, IGNORED_DIRECTORIES};
pub use filters::{
    apply_filters, extension_filter, glob_filter, larger_than, name_filter, AssetFilter,
    FilterMode,
};
