// Exposes GIT_COMMIT_HASH and friends through `built_info`.
fn main() {
    built::write_built_file().expect("failed to write build metadata for warden");
}
