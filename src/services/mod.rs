pub mod batch_deleter;
pub mod deletion_coordinator;
pub mod discovery;
pub mod dry_run;
pub mod file_tracker;
pub mod job_store;
pub mod memory_store;
pub mod object_store;
pub mod purge;
pub mod remote_worker;
pub mod s3_store;
pub mod strategies;

#[cfg(test)]
pub mod test_support;
