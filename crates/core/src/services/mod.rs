pub mod backends;
pub mod extraction;
pub mod oracle;
