pub mod cloudfiles;
pub mod fs;
pub mod s3;
