//! Discord presentation: embeds and the colour palette.

pub mod embeds;
