pub mod config;
pub mod protocol;
pub mod session;
pub mod term;
pub mod transport;

#[cfg(test)]
mod tests;
