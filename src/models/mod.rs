mod access_grant;
mod course;
mod purchase;

pub use access_grant::*;
pub use course::*;
pub use purchase::*;
