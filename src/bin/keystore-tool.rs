//! Offline inspection and editing tool for a keystore flash image, plus an
//! SFDP dump decoder. Operates on a `RamFs` snapshot persisted to disk with
//! `bincode`, exactly the way the crate's own tests drive the backend, so
//! no physical SPI part is required.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, Context as _};
use bincode::{DefaultOptions, Options};
use clap::{Parser, Subcommand};

use keystore::block::sfdp::{BufferTransport, SfdpProbe};
use keystore::fs::backend::RamFs;
use keystore::fs::{Filesystem, OpenMode, Whence};

#[derive(Debug, Parser)]
#[clap(name = "keystore-tool", about = "Inspect and edit a keystore flash image offline")]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// Set verbosity of the output (can be used multiple times)
    #[clap(short, long, parse(from_occurrences), global = true)]
    verbose: u32,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a fresh, formatted image with the standard directory layout.
    Init {
        #[clap(value_name = "IMAGE")]
        image: PathBuf,
    },
    /// Create a directory inside an image.
    Mkdir {
        #[clap(value_name = "IMAGE")]
        image: PathBuf,
        path: String,
    },
    /// List a directory's entries.
    Ls {
        #[clap(value_name = "IMAGE")]
        image: PathBuf,
        path: String,
    },
    /// Print a file's contents to stdout.
    Cat {
        #[clap(value_name = "IMAGE")]
        image: PathBuf,
        path: String,
    },
    /// Write a host file's contents into the image at the given path.
    Put {
        #[clap(value_name = "IMAGE")]
        image: PathBuf,
        path: String,
        #[clap(value_name = "HOST_FILE")]
        input: PathBuf,
    },
    /// Remove a file or (optionally, recursively) a directory.
    Rm {
        #[clap(value_name = "IMAGE")]
        image: PathBuf,
        path: String,
        #[clap(short, long)]
        recursive: bool,
    },
    /// Decode a captured SFDP dump (3-byte JEDEC ID followed by the raw SFDP
    /// image read from address 0) without any hardware attached.
    SfdpDecode {
        #[clap(value_name = "DUMP_FILE")]
        file: PathBuf,
    },
}

fn bincode_opts() -> impl bincode::Options
{
    DefaultOptions::new().with_fixint_encoding().allow_trailing_bytes()
}

fn load_image(path: &PathBuf) -> anyhow::Result<Filesystem<RamFs>>
{
    let bytes = fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    let backend: RamFs = bincode_opts().deserialize(&bytes).context("decoding image snapshot")?;
    let fs = Filesystem::new(backend);
    fs.mount()?;
    Ok(fs)
}

fn save_image(path: &PathBuf, fs: Filesystem<RamFs>) -> anyhow::Result<()>
{
    fs.unmount()?;
    let backend = fs.into_backend();
    let bytes = bincode_opts().serialize(&backend).context("encoding image snapshot")?;
    fs::write(path, bytes).with_context(|| format!("writing image {}", path.display()))?;
    Ok(())
}

fn run(args: Args) -> anyhow::Result<()>
{
    if args.verbose > 0 {
        eprintln!("keystore-tool: {:?}", args.command);
    }

    match args.command {
        Command::Init { image } => {
            let fs = Filesystem::new(RamFs::new());
            fs.init()?;
            fs.mkdir("layers")?;
            fs.mkdir("macros")?;
            fs.mkdir("ee")?;
            save_image(&image, fs)?;
            Ok(())
        }
        Command::Mkdir { image, path } => {
            let fs = load_image(&image)?;
            fs.mkdir(&path)?;
            save_image(&image, fs)
        }
        Command::Ls { image, path } => {
            let fs = load_image(&image)?;
            let fd = fs.opendir(&path)?;
            while let Some(entry) = fs.readdir(fd)? {
                let marker = if entry.is_dir { "/" } else { "" };
                println!("{}{}\t{}", entry.name, marker, entry.size);
            }
            fs.closedir(fd)?;
            Ok(())
        }
        Command::Cat { image, path } => {
            let fs = load_image(&image)?;
            let fd = fs.open(&path, OpenMode::READ)?;
            let mut buf = vec![0u8; 4096];
            loop {
                let n = fs.read(fd, &mut buf)?;
                if n <= 0 {
                    break;
                }
                std::io::stdout().write_all(&buf[..n as usize])?;
            }
            fs.close(fd)?;
            Ok(())
        }
        Command::Put { image, path, input } => {
            let fs = load_image(&image)?;
            let data = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let fd = fs.open(&path, OpenMode::WRITE | OpenMode::TRUNCATE)?;
            fs.seek(fd, 0, Whence::Set)?;
            let written = fs.write(fd, &data)?;
            fs.close(fd)?;
            if written < 0 || written as usize != data.len() {
                return Err(anyhow!("short write into {path}"));
            }
            save_image(&image, fs)
        }
        Command::Rm { image, path, recursive } => {
            let fs = load_image(&image)?;
            if recursive {
                fs.rmdir(&path, true)?;
            } else {
                fs.delete(&path)?;
            }
            save_image(&image, fs)
        }
        Command::SfdpDecode { file } => {
            let bytes = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            if bytes.len() < 3 {
                return Err(anyhow!("dump too short to contain a JEDEC ID"));
            }
            let mut transport = BufferTransport {
                jedec_id: [bytes[0], bytes[1], bytes[2]],
                sfdp_image: bytes[3..].to_vec(),
            };
            let profile = SfdpProbe::probe(&mut transport)?;
            println!("jedec_id: {:02X} {:02X} {:02X}", profile.jedec_id[0], profile.jedec_id[1], profile.jedec_id[2]);
            println!("density_bytes: {}", profile.density_bytes);
            println!("address_width: {:?}", profile.address_width);
            println!("min_erase_size: {:?}", profile.min_erase_size());
            println!("fast_read 1-1-2: {}", profile.fast_read.supports_1_1_2);
            println!("fast_read 1-2-2: {}", profile.fast_read.supports_1_2_2);
            println!("fast_read 1-1-4: {}", profile.fast_read.supports_1_1_4);
            println!("fast_read 1-4-4: {}", profile.fast_read.supports_1_4_4);
            println!("fast_read 2-2-2: {}", profile.fast_read.supports_2_2_2);
            println!("fast_read 4-4-4: {}", profile.fast_read.supports_4_4_4);
            Ok(())
        }
    }
}

fn main()
{
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
