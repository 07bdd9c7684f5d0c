mod support;

mod fatal_file_read;
mod happy_photo;
mod ml_batch_window;
mod reconciliation_orphan_cleanup;
mod selective_retry;
mod warning_missing_exif_tool;
