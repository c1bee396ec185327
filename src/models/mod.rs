pub mod image;
pub mod openai;

#[allow(unused_imports)]
pub use image::*;
#[allow(unused_imports)]
pub use openai::*;
