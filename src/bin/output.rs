use std::fs;
use std::io::Write;
use std::path::Path;

use crate::builder::BuilderError;

/// Writes `image` to `path` through a temporary file in the same directory,
/// so `path` holds either its old contents or the complete image.
pub fn write_image(path: &Path, image: &[u8]) -> Result<(), BuilderError> {
    let output_error = |source| BuilderError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(".mklittlefs-");
    // same mode a plain create would give: 0666 minus the umask
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }

    // dropped (and deleted) on any error below
    let mut tmp = builder.tempfile_in(dir).map_err(output_error)?;
    tmp.write_all(image).map_err(output_error)?;
    // a rebuilt image keeps the mode of the one it replaces
    if let Ok(existing) = fs::metadata(path) {
        tmp.as_file()
            .set_permissions(existing.permissions())
            .map_err(output_error)?;
    }
    tmp.as_file().sync_all().map_err(output_error)?;
    tmp.persist(path).map_err(|err| output_error(err.error))?;

    log::debug!("renamed temporary image to {}", path.display());
    Ok(())
}
