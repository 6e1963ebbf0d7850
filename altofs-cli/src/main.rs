use std::path::PathBuf;

use altofs_storage::image::ImageFormat;
use altofs_storage::Filesystem;
use altofs_types::Geometry;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "altofs", version, arg_required_else_help = true)]
struct Cli {
    /// Verbosity: pass more than once for more detail
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads an image and runs the whole-disk integrity checker.
    Check(ImageArgs),
    /// Lists a directory's entries.
    List(ListArgs),
    /// Prints a file's leader-page metadata.
    Info(InfoArgs),
    /// Extracts a file's contents to a host path.
    Extract(ExtractArgs),
    /// Inserts a host file's contents into the image, writing a new image.
    Insert(InsertArgs),
    /// Copies a file within the image (a new directory entry, not a deep copy).
    Copy(CopyArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Raw,
    Framed,
}

impl From<OutputFormat> for ImageFormat {
    fn from(f: OutputFormat) -> ImageFormat {
        match f {
            OutputFormat::Raw => ImageFormat::Raw,
            OutputFormat::Framed => ImageFormat::Framed,
        }
    }
}

#[derive(Args, Clone, Copy)]
struct GeometryArgs {
    /// Number of physical disks in the image
    #[arg(long, default_value_t = Geometry::DEFAULT.num_disks)]
    disks: u16,
    /// Cylinders per disk
    #[arg(long, default_value_t = Geometry::DEFAULT.num_cylinders)]
    cylinders: u16,
    /// Heads per cylinder
    #[arg(long, default_value_t = Geometry::DEFAULT.num_heads)]
    heads: u16,
    /// Sectors per head
    #[arg(long, default_value_t = Geometry::DEFAULT.num_sectors)]
    sectors: u16,
    /// On-wire sector size, in 16-bit words
    #[arg(long, default_value_t = Geometry::DEFAULT.sector_words)]
    sector_words: u16,
}

impl From<GeometryArgs> for Geometry {
    fn from(g: GeometryArgs) -> Geometry {
        Geometry {
            num_disks: g.disks,
            num_cylinders: g.cylinders,
            num_heads: g.heads,
            num_sectors: g.sectors,
            sector_words: g.sector_words,
        }
    }
}

#[derive(Args)]
struct ImageArgs {
    /// Path to the disk image
    image: PathBuf,
    #[command(flatten)]
    geometry: GeometryArgs,
}

#[derive(Args)]
struct ListArgs {
    #[command(flatten)]
    image: ImageArgs,
    /// Directory path to list, `<A>B>C` grammar rooted at SysDir
    #[arg(long, default_value = "<")]
    dir: String,
}

#[derive(Args)]
struct InfoArgs {
    #[command(flatten)]
    image: ImageArgs,
    /// File path to describe
    name: String,
}

#[derive(Args)]
struct ExtractArgs {
    #[command(flatten)]
    image: ImageArgs,
    /// File path inside the image
    name: String,
    /// Host path to write the extracted contents to
    output: PathBuf,
}

#[derive(Args)]
struct InsertArgs {
    #[command(flatten)]
    image: ImageArgs,
    /// Host path whose contents should be written into the image
    input: PathBuf,
    /// File path inside the image
    name: String,
    /// Where to write the resulting image
    #[arg(long)]
    save: PathBuf,
    #[arg(long, value_enum, default_value = "raw")]
    format: OutputFormat,
}

#[derive(Args)]
struct CopyArgs {
    #[command(flatten)]
    image: ImageArgs,
    src: String,
    dst: String,
    #[arg(long)]
    save: PathBuf,
    #[arg(long, value_enum, default_value = "raw")]
    format: OutputFormat,
}

fn load_checked(args: &ImageArgs) -> Result<Filesystem> {
    let geometry: Geometry = args.geometry.into();
    let mut fs = Filesystem::load_image(&args.image, geometry)
        .with_context(|| format!("loading image {}", args.image.display()))?;
    let report = fs.check_integrity()?;
    if !report.is_clean() {
        for msg in &report.messages {
            tracing::warn!("{msg}");
        }
        bail!("image failed integrity check with {} violation(s)", report.violations());
    }
    Ok(fs)
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(format!("altofs={level}")))
        .init();

    match cli.command {
        Commands::Check(args) => {
            let fs = load_checked(&args)?;
            println!("image OK: {} pages, {} free", fs.len(), fs.free_pages());
        }
        Commands::List(args) => {
            let fs = load_checked(&args.image)?;
            let (_, dir_fe, _, _) = fs.resolve_name(&args.dir)?;
            for entry in fs.scan_directory(&dir_fe)? {
                let entry = entry?;
                if entry.kind == altofs_types::DirEntryType::Valid {
                    println!("{}", entry.name);
                }
            }
        }
        Commands::Info(args) => {
            let fs = load_checked(&args.image)?;
            let (found, fe, _, _) = fs.resolve_name(&args.name)?;
            if !found {
                bail!("{} not found", args.name);
            }
            let info = fs.file_info(&fe)?;
            println!("name:     {}", info.name);
            println!("created:  {}", info.created);
            println!("written:  {}", info.written);
            println!("read:     {}", info.read);
            println!("length:   {} bytes", fs.file_length(&fe)?);
        }
        Commands::Extract(args) => {
            let fs = load_checked(&args.image)?;
            fs.extract_file(&args.name, &args.output)?;
        }
        Commands::Insert(args) => {
            let mut fs = load_checked(&args.image)?;
            fs.insert_file(&args.input, &args.name)?;
            fs.save_image(&args.save, args.format.into())?;
        }
        Commands::Copy(args) => {
            let mut fs = load_checked(&args.image)?;
            fs.copy(&args.src, &args.dst)?;
            fs.save_image(&args.save, args.format.into())?;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    run()
}
