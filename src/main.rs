use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use fuser::MountOption;

use a1fs::fs::Filesystem;
use a1fs::fuse::A1Fuse;
use a1fs::image::FileImage;

/// Mount an a1fs image over FUSE.
#[derive(Parser)]
#[command(name = "a1fs")]
struct Cli {
    /// File system image file path.
    image: PathBuf,

    /// Directory to mount the file system on.
    mount_point: PathBuf,

    /// Allow other users to access the mount.
    #[arg(long)]
    allow_other: bool,

    /// Unmount automatically when the process exits.
    #[arg(long)]
    auto_unmount: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let image = match FileImage::open(&cli.image) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("a1fs: failed to open image {}: {}", cli.image.display(), e);
            exit(1);
        }
    };
    let fs = match Filesystem::mount(image) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!(
                "a1fs: failed to mount the file system: {}",
                std::io::Error::from_raw_os_error(e)
            );
            exit(1);
        }
    };

    let mut options = vec![MountOption::FSName(String::from("a1fs"))];
    if cli.allow_other {
        options.push(MountOption::AllowOther);
    }
    if cli.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }

    if let Err(e) = fuser::mount2(A1Fuse::new(fs), &cli.mount_point, &options) {
        eprintln!("a1fs: {e}");
        exit(1);
    }
}
