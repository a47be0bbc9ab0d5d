mod destination_test;
mod engine_test;
