use clap::Parser;

/// Unlinks a ring's shared memory segments and lock file, best effort.
/// For crashed producers that never got to clean up after themselves.
#[derive(Parser, Debug)]
#[command(name = "shm-cleanup")]
struct Args {
    #[arg(env = "SHM_NAME", default_value = "ivis_shm_data")]
    data_name: String,

    #[arg(env = "SHM_META_NAME", default_value = "ivis_shm_meta")]
    meta_name: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if !ivis_ring::exists(&args.data_name, &args.meta_name) {
        eprintln!(
            "nothing to clean: {} / {} not found",
            args.data_name, args.meta_name
        );
        // A stray lock file or lone segment may still be lying around.
        ivis_ring::cleanup(&args.data_name, &args.meta_name)?;
        return Ok(());
    }
    ivis_ring::cleanup(&args.data_name, &args.meta_name)?;
    eprintln!("unlinked {} / {}", args.data_name, args.meta_name);
    Ok(())
}
