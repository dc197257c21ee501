pub mod fetch;
pub mod hls;
pub mod serve;
pub mod track;
