pub mod checksum;
pub mod fs_storage;
pub mod mp4_writer;
pub mod naming;
pub mod raw_sink;
