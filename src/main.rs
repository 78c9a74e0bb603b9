use clap::{Parser, Subcommand};
use folio::config::{self, FolioConfig};
use folio::imaging::{FocusPoint, ImageBackend, OutputFormat, RustBackend};
use folio::pipeline::FsPipeline;
use folio::rasterize::Rasterizer;
use folio::{ImageId, TransformError, TransformRequest, output};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Package version on release tags, `<version>+<git describe>` elsewhere.
fn version_string() -> &'static str {
    let describe = env!("FOLIO_GIT_DESCRIBE");
    if describe.is_empty() {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup, called exactly once
        Box::leak(format!("{}+{describe}", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

/// Crop box and focus point, shared by every command that addresses a
/// derivative family.
#[derive(clap::Args, Clone)]
struct CropArgs {
    /// Crop aspect width (crop only applies when both sides are given)
    #[arg(long)]
    crop_width: Option<u32>,

    /// Crop aspect height
    #[arg(long)]
    crop_height: Option<u32>,

    /// Horizontal focus of the crop, 0 = left edge, 1 = right edge
    #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
    focus_x: f64,

    /// Vertical focus of the crop, 0 = top edge, 1 = bottom edge
    #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
    focus_y: f64,
}

impl CropArgs {
    fn focus(&self) -> Result<FocusPoint, TransformError> {
        FocusPoint::new(self.focus_x, self.focus_y)
            .map_err(|e| TransformError::InvalidRequest(e.to_string()))
    }

    fn crop(&self) -> Option<(u32, u32)> {
        self.crop_width.zip(self.crop_height)
    }
}

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Cropped and resized derivatives of rasterized PDF pages")]
#[command(long_about = "\
Cropped and resized derivatives of rasterized PDF pages

A PDF page is converted once into a reference PNG in the store. Every image
a page shows is a derivative of it: cropped around a focus point, resized and
encoded as webp, png, jpeg, avif or tiff. Derivatives are cached under a key
that fully describes them.

Typical flow:

  folio convert report.pdf --page 3          # → id 3f9a…
  folio responsive 3f9a… --crop-width 16 --crop-height 9
  folio prewarm 3f9a… --crop-width 16 --crop-height 9
  folio render 3f9a… --width 640 --format avif -o hero.avif

Logging goes to stderr; set RUST_LOG to override the filter.

Run 'folio gen-config' to generate a documented folio.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (stock defaults when it does not exist)
    #[arg(long, default_value = config::CONFIG_FILE_NAME, global = true)]
    config: PathBuf,

    /// Reference image directory (overrides storage.root)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Derivative cache directory (overrides cache.dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Disable the derivative cache: encode every request
    #[arg(long, global = true)]
    no_cache: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rasterize one PDF page into the store
    Convert {
        pdf: PathBuf,

        /// Page to convert, starting at 1
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// URL prefix images are served under
        #[arg(long, default_value = "/image")]
        base_url: String,
    },
    /// Render one derivative to a file
    Render {
        id: String,

        /// Output format: webp, png, jpeg, avif or tiff
        #[arg(long, default_value = "webp")]
        format: String,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        #[command(flatten)]
        crop: CropArgs,

        /// Where to write the encoded bytes
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the responsive <img> markup for a stored image
    Responsive {
        id: String,

        #[command(flatten)]
        crop: CropArgs,

        /// URL the derivatives are served from (default: /image/<id>)
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Render every responsive derivative of an image into the cache
    Prewarm {
        id: String,

        #[command(flatten)]
        crop: CropArgs,

        /// URL the derivatives are served from (default: /image/<id>)
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Print a stock folio.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let open = || -> Result<(FolioConfig, FsPipeline), Box<dyn std::error::Error>> {
        let site_config = resolve_config(&cli)?;
        let pipeline = FsPipeline::from_config(&site_config, cli.no_cache)?;
        Ok((site_config, pipeline))
    };

    match &cli.command {
        Command::Convert {
            pdf,
            page,
            base_url,
        } => {
            let (site_config, pipeline) = open()?;
            let bytes = std::fs::read(pdf)?;
            let filename = pdf
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let rasterizer = rasterizer(&site_config);
            let converted = pipeline.convert(rasterizer.as_ref(), &bytes, *page, &filename)?;
            output::print_convert_output(&converted, base_url);
            println!("{}", serde_json::to_string_pretty(&converted)?);
        }
        Command::Render {
            id,
            format,
            width,
            height,
            crop,
            output: out_path,
        } => {
            let (_, pipeline) = open()?;
            let format: OutputFormat = format.parse().map_err(TransformError::from)?;
            let mut request = TransformRequest::new(ImageId::new(id.as_str())?)
                .with_format(format)
                .with_size(*width, *height)
                .with_focus(crop.focus()?);
            request.crop_width = crop.crop_width;
            request.crop_height = crop.crop_height;

            let derivative = pipeline.render(&request)?;
            write_output(out_path, &derivative.bytes)?;
            let dims = RustBackend::new().identify(&derivative.bytes).ok();
            output::print_render_output(&request, &derivative, dims, out_path);
        }
        Command::Responsive { id, crop, base_url } => {
            let (_, pipeline) = open()?;
            let id = ImageId::new(id.as_str())?;
            let base_url = base_url.clone().unwrap_or_else(|| format!("/image/{id}"));
            let image = pipeline.responsive(&id, crop.crop(), crop.focus()?, &base_url)?;
            println!("{}", image.to_markup().into_string());
        }
        Command::Prewarm { id, crop, base_url } => {
            let (site_config, pipeline) = open()?;
            let id = ImageId::new(id.as_str())?;
            let base_url = base_url.clone().unwrap_or_else(|| format!("/image/{id}"));
            let image = pipeline.responsive(&id, crop.crop(), crop.focus()?, &base_url)?;
            init_thread_pool(&site_config.processing);
            let stats = pipeline.prewarm(&image)?;
            output::print_prewarm_output(&image, &stats);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Install the stderr subscriber. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: bool) {
    let filter = if verbose { "folio=debug" } else { "folio=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();
}

/// Load the config file and apply command-line overrides.
fn resolve_config(cli: &Cli) -> Result<FolioConfig, config::ConfigError> {
    let mut site_config = config::load_config(&cli.config)?;
    if let Some(store) = &cli.store {
        site_config.storage.root = store.to_string_lossy().into_owned();
    }
    if let Some(dir) = &cli.cache_dir {
        site_config.cache.dir = dir.to_string_lossy().into_owned();
    }
    Ok(site_config)
}

#[cfg(feature = "pdfium")]
fn rasterizer(site_config: &FolioConfig) -> Box<dyn Rasterizer> {
    Box::new(folio::rasterize::PdfiumRasterizer::new(
        site_config.rasterize.target_width,
        site_config.rasterize.library_path.as_ref().map(PathBuf::from),
    ))
}

#[cfg(not(feature = "pdfium"))]
fn rasterizer(_site_config: &FolioConfig) -> Box<dyn Rasterizer> {
    Box::new(folio::rasterize::UnavailableRasterizer)
}

fn write_output(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
