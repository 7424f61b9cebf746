pub mod allocation_writer;
pub mod command_reader;
