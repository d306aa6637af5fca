pub mod inbox_processor;
