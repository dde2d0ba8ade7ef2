//! Per-job artifacts consumed by DICe.
//!
//! For every image pair the builder creates `<output>/<job name>/`, copies
//! the shared template parameters file into it as [`PARAMS_FILE_NAME`] and
//! writes the input description [`INPUT_FILE_NAME`] that points DICe at the
//! two images.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use crate::config::BatchConfiguration;
use crate::types::{file_name_lossy, ImagePair};

/// Name of the copied template parameters file inside each job directory.
pub const PARAMS_FILE_NAME: &str = "dice_params.xml";

/// Name of the generated input description inside each job directory.
pub const INPUT_FILE_NAME: &str = "dice_input.xml";

/// Error type for descriptor generation.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("template parameters file was not found at {}", path.display())]
    TemplateMissing { path: PathBuf },

    #[error("could not determine the folder of reference image {}", path.display())]
    MissingImageFolder { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk artifacts of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub name: String,
    /// Absolute job directory, also the working directory of the process.
    pub dir: PathBuf,
    /// Absolute path of the generated input description.
    pub input_path: PathBuf,
    /// Absolute path of the copied template parameters file.
    pub params_path: PathBuf,
}

/// Values written into a DICe input description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDescription {
    /// Absolute, ending in a path separator.
    pub output_folder: String,
    /// Absolute, ending in a path separator.
    pub image_folder: String,
    pub subset_size: u32,
    pub step_size: u32,
    pub reference_image: String,
    pub deformed_image: String,
}

impl InputDescription {
    /// Render the `ParameterList` document.
    pub fn render(&self) -> String {
        format!(
            r#"<?xml version="1.0"?>
<ParameterList>
  <Parameter name="output_folder" type="string" value="{output_folder}" />
  <Parameter name="image_folder" type="string" value="{image_folder}" />
  <Parameter name="correlation_parameters_file" type="string" value="{PARAMS_FILE_NAME}" />
  <Parameter name="subset_size" type="int" value="{subset_size}" />
  <Parameter name="step_size" type="int" value="{step_size}" />
  <Parameter name="reference_image" type="string" value="{reference_image}" />
  <ParameterList name="deformed_images">
    <Parameter name="{deformed_image}" type="bool" value="true" />
  </ParameterList>
</ParameterList>
"#,
            output_folder = escape_xml(&self.output_folder),
            image_folder = escape_xml(&self.image_folder),
            subset_size = self.subset_size,
            step_size = self.step_size,
            reference_image = escape_xml(&self.reference_image),
            deformed_image = escape_xml(&self.deformed_image),
        )
    }
}

/// Directory of the running executable joined with [`PARAMS_FILE_NAME`].
pub fn default_template_path() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(PARAMS_FILE_NAME))
}

/// Materialize the job directory and both XML files for `pair`.
///
/// Fails with [`DescriptorError::TemplateMissing`] before touching the
/// output folder when `template_path` does not exist. Reruns overwrite
/// previous artifacts.
pub async fn build_job(
    pair: &ImagePair,
    config: &BatchConfiguration,
    template_path: &Path,
) -> Result<JobDescriptor, DescriptorError> {
    if !tokio::fs::try_exists(template_path).await.unwrap_or(false) {
        return Err(DescriptorError::TemplateMissing {
            path: template_path.to_path_buf(),
        });
    }

    let name = pair.job_name();
    let dir = std::path::absolute(config.output_folder.join(&name))?;
    tokio::fs::create_dir_all(&dir).await?;

    let params_path = dir.join(PARAMS_FILE_NAME);
    tokio::fs::copy(template_path, &params_path).await?;

    let image_folder = pair
        .reference
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| DescriptorError::MissingImageFolder {
            path: pair.reference.clone(),
        })?;
    let image_folder = std::path::absolute(image_folder)?;

    let description = InputDescription {
        output_folder: with_trailing_separator(&dir),
        image_folder: with_trailing_separator(&image_folder),
        subset_size: config.subset_size,
        step_size: config.step_size,
        reference_image: file_name_lossy(&pair.reference),
        deformed_image: file_name_lossy(&pair.deformed),
    };

    let input_path = dir.join(INPUT_FILE_NAME);
    tokio::fs::write(&input_path, description.render()).await?;

    tracing::debug!(job = %name, input = %input_path.display(), "Job descriptor written");

    Ok(JobDescriptor {
        name,
        dir,
        input_path,
        params_path,
    })
}

/// Path as text, terminated by a separator. DICe concatenates folder and
/// file names without inserting one.
pub fn with_trailing_separator(path: &Path) -> String {
    let mut text = path.to_string_lossy().into_owned();
    if !text.ends_with('/') && !text.ends_with('\\') {
        text.push(MAIN_SEPARATOR);
    }
    text
}

/// Escape the five XML special characters for use inside an attribute.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
