pub mod batch;
pub mod compare;
pub mod grade;
pub mod init;
pub mod validate;
