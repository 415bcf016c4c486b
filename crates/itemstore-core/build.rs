/// Builds the gRPC client and server code for `itemstore.proto` using
/// `tonic-prost-build`.
///
/// The encoded file descriptor set is written next to the generated code so
/// the server can expose it through gRPC reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/itemstore.proto`
/// - Includes: `proto/`
///
/// # Output
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("itemstore.v1");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("itemstore_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/itemstore.proto");

    tonic_prost_build::configure()
        .file_descriptor_set_path(&descriptor_path)
        .compile_protos(&["proto/itemstore.proto"], &["proto"])?;

    Ok(())
}
