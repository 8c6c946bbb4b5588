pub mod download_tileset;

pub use download_tileset::download_tileset;
