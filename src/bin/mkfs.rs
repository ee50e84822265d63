use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

use a1fs::fs::{self, Filesystem};
use a1fs::image::{FileImage, Image};

/// Format an image file into an a1fs file system. The file must exist and
/// its size must be a multiple of the a1fs block size, 4096 bytes.
#[derive(Parser)]
#[command(name = "mkfs.a1fs")]
struct Cli {
    /// Number of inodes.
    #[arg(short = 'i', value_name = "NUM")]
    inodes: u32,

    /// Force format: overwrite an existing a1fs file system.
    #[arg(short = 'f')]
    force: bool,

    /// Zero out the image contents before formatting.
    #[arg(short = 'z')]
    zero: bool,

    /// File system image file path.
    image: PathBuf,
}

fn main() {
    env_logger::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Help goes to stdout with a clean exit; usage errors exit 1.
        Err(e) => {
            let _ = e.print();
            exit(if e.use_stderr() { 1 } else { 0 });
        }
    };
    if cli.inodes == 0 {
        eprintln!("mkfs.a1fs: number of inodes must be positive");
        exit(1);
    }

    let mut image = match FileImage::open(&cli.image) {
        Ok(image) => image,
        Err(e) => {
            eprintln!(
                "mkfs.a1fs: failed to open image {}: {}",
                cli.image.display(),
                e
            );
            exit(1);
        }
    };

    if !cli.force && fs::is_formatted(image.bytes()) {
        eprintln!("mkfs.a1fs: image already contains a1fs; use -f to overwrite");
        exit(1);
    }
    if cli.zero {
        image.bytes_mut().fill(0);
    }

    match Filesystem::format(image, cli.inodes) {
        Ok(fs) => {
            if let Err(e) = fs.unmount() {
                eprintln!("mkfs.a1fs: failed to flush the image: {e}");
                exit(1);
            }
        }
        Err(e) => {
            eprintln!(
                "mkfs.a1fs: failed to format the image: {}",
                std::io::Error::from_raw_os_error(e)
            );
            exit(1);
        }
    }
}
