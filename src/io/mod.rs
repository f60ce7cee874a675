//! Input sources: scene archives, Sentinel-2 metadata and elevation

pub mod archive;
pub mod dem;
pub mod metadata;

pub use archive::{InMemoryArchive, OpticalArchive, RadarArchive, RadarQuery};
pub use dem::{ConstantElevation, DemRaster, ElevationSource};
#[cfg(feature = "gdal")]
pub use dem::DemReader;
pub use metadata::{parse_product_metadata, parse_tile_metadata, scene_metadata, ProductMetadata, TileMetadata};
