pub mod lakehouse;
