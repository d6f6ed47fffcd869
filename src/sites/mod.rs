//! Site profiles for the gallery widgets the harvester knows how to drive

pub mod pro_gallery;
