//! Materializing a single file from an extracted package into a prefix.

use std::{
    borrow::Cow,
    fmt,
    fmt::Formatter,
    io::{Seek, Write},
    path::{Path, PathBuf},
};

use krait_conda_types::{
    package::{FileMode, PathType, PathsEntry},
    NoArchType, Platform,
};
use krait_digest::{HashingWriter, Sha256, Sha256Hash};
use memmap2::Mmap;
use thiserror::Error;

use super::python::PythonInfo;

/// Options of one transaction execution.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Permit hard links from the package cache into the prefix.
    pub allow_hard_links: bool,

    /// Permit symbolic links (used as fallback, or always with
    /// `always_softlink`).
    pub allow_symbolic_links: bool,

    /// Copy every file, never link.
    pub always_copy: bool,

    /// Symlink every file that does not need patching.
    pub always_softlink: bool,

    /// Compile `.py` sources to `.pyc` after linking when the prefix has a
    /// python.
    pub compile_pyc: bool,

    /// The platform of the target prefix.
    pub platform: Platform,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            allow_hard_links: true,
            allow_symbolic_links: !Platform::current().is_windows(),
            always_copy: false,
            always_softlink: false,
            compile_pyc: true,
            platform: Platform::current(),
        }
    }
}

/// How a file was materialized.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LinkMethod {
    /// A hard link into the package cache.
    Hardlink,

    /// A symbolic link.
    Softlink,

    /// A plain copy.
    Copy,

    /// A copy with the prefix placeholder substituted.
    Patched(FileMode),
}

impl fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinkMethod::Hardlink => write!(f, "hardlink"),
            LinkMethod::Softlink => write!(f, "softlink"),
            LinkMethod::Copy => write!(f, "copy"),
            LinkMethod::Patched(FileMode::Binary) => write!(f, "binary patched"),
            LinkMethod::Patched(FileMode::Text) => write!(f, "text patched"),
        }
    }
}

/// Errors raised by [`link_file`].
#[derive(Debug, Error)]
pub enum LinkFileError {
    /// An I/O error without a more specific classification.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The parent directory of the destination could not be created.
    #[error("failed to create parent directory")]
    FailedToCreateParentDirectory(#[source] std::io::Error),

    /// The source file could not be opened or read.
    #[error("failed to read the source file")]
    FailedToReadSourceFile(#[source] std::io::Error),

    /// The destination file could not be created or written.
    #[error("failed to write the destination file")]
    FailedToWriteDestination(#[source] std::io::Error),

    /// Linking failed and no fallback was allowed.
    #[error("failed to {0} file into the prefix")]
    FailedToLink(LinkMethod, #[source] std::io::Error),

    /// The prefix is longer than the placeholder of a binary file; the
    /// substitution cannot preserve the file length.
    #[error("the target prefix is too long for the binary placeholder")]
    PrefixTooLong,

    /// A noarch-python file cannot be placed without knowing the python
    /// version.
    #[error("cannot link noarch python files because no python is installed")]
    MissingPythonInfo,
}

/// The result of linking one file.
pub struct LinkedFile {
    /// True when an existing file was overwritten (two packages claim the
    /// same path).
    pub clobbered: bool,

    /// The SHA256 of the linked file, when it was (re)computed or known.
    pub sha256: Option<Sha256Hash>,

    /// The size of the linked file in bytes, when known.
    pub file_size: Option<u64>,

    /// The path of the file relative to the prefix. Differs from the path
    /// inside the package for noarch-python files.
    pub relative_path: PathBuf,

    /// How the file was materialized.
    pub method: LinkMethod,
}

/// Links one `paths.json` entry from `package_dir` into `target_dir`,
/// substituting `target_prefix` for the entry's placeholder where required.
pub fn link_file(
    noarch: NoArchType,
    entry: &PathsEntry,
    package_dir: &Path,
    target_dir: &Path,
    target_prefix: &str,
    options: &InstallOptions,
    python_info: Option<&PythonInfo>,
) -> Result<LinkedFile, LinkFileError> {
    let source_path = package_dir.join(&entry.relative_path);

    let relative_path: Cow<'_, Path> = if noarch.is_python() {
        python_info
            .ok_or(LinkFileError::MissingPythonInfo)?
            .noarch_target_path(&entry.relative_path)
    } else {
        Cow::Borrowed(entry.relative_path.as_path())
    };
    let destination_path = target_dir.join(&relative_path);

    if let Some(parent) = destination_path.parent() {
        fs_err::create_dir_all(parent).map_err(LinkFileError::FailedToCreateParentDirectory)?;
    }

    // An existing file means another package owns the path too; the later
    // link wins, which matches the behavior users know from conda.
    let clobbered = destination_path.is_file();
    if clobbered {
        fs_err::remove_file(&destination_path)?;
    }

    let mut sha256 = entry.sha256;
    let mut file_size = entry.size_in_bytes;

    let method = if let Some(placeholder) = entry.placeholder() {
        let source = map_or_read(&source_path)?;
        let destination = fs_err::File::create(&destination_path)
            .map_err(LinkFileError::FailedToWriteDestination)?;
        let mut writer = HashingWriter::<_, Sha256>::new(destination);

        // Backslashes in the prefix break string escaping on windows; conda
        // writes forward slashes there instead.
        let target_prefix: Cow<'_, str> = if options.platform.is_windows() {
            Cow::Owned(target_prefix.replace('\\', "/"))
        } else {
            Cow::Borrowed(target_prefix)
        };

        match placeholder.file_mode {
            FileMode::Text => copy_replacing_placeholder_text(
                source.as_ref(),
                &mut writer,
                placeholder.placeholder.as_bytes(),
                target_prefix.as_bytes(),
            )?,
            FileMode::Binary => copy_replacing_placeholder_binary(
                source.as_ref(),
                &mut writer,
                placeholder.placeholder.as_bytes(),
                target_prefix.as_bytes(),
            )?,
        }

        let (mut destination, hash) = writer.finalize();
        sha256 = Some(hash);
        file_size = destination.stream_position().ok();
        copy_permissions(&source_path, &destination_path);
        LinkMethod::Patched(placeholder.file_mode)
    } else if entry.path_type == PathType::SoftLink {
        relink_symlink(&source_path, &destination_path)?
    } else if options.always_copy || entry.no_link {
        copy_file(&source_path, &destination_path, &mut sha256, &mut file_size)?
    } else if options.always_softlink && options.allow_symbolic_links {
        symlink(&source_path, &destination_path)
            .map_err(|err| LinkFileError::FailedToLink(LinkMethod::Softlink, err))?;
        LinkMethod::Softlink
    } else if options.allow_hard_links {
        match fs_err::hard_link(&source_path, &destination_path) {
            Ok(()) => {
                if sha256.is_none() {
                    sha256 = krait_digest::compute_file_digest::<Sha256>(&destination_path).ok();
                }
                LinkMethod::Hardlink
            }
            Err(err) => {
                // Hard links fail across filesystems; continue down the
                // hardlink > softlink > copy cascade.
                tracing::debug!(
                    "hard link of {} failed ({err}), falling back",
                    source_path.display()
                );
                match try_softlink_fallback(&source_path, &destination_path, options) {
                    Some(method) => method,
                    None => {
                        copy_file(&source_path, &destination_path, &mut sha256, &mut file_size)?
                    }
                }
            }
        }
    } else if options.allow_symbolic_links {
        symlink(&source_path, &destination_path)
            .map_err(|err| LinkFileError::FailedToLink(LinkMethod::Softlink, err))?;
        LinkMethod::Softlink
    } else {
        copy_file(&source_path, &destination_path, &mut sha256, &mut file_size)?
    };

    Ok(LinkedFile {
        clobbered,
        sha256,
        file_size,
        relative_path: relative_path.into_owned(),
        method,
    })
}

/// The softlink step of the hardlink > softlink > copy cascade: returns
/// `None` when symlinks are not allowed or cannot be created, in which case
/// the caller copies instead.
fn try_softlink_fallback(
    source_path: &Path,
    destination_path: &Path,
    options: &InstallOptions,
) -> Option<LinkMethod> {
    if !options.allow_symbolic_links {
        return None;
    }
    match symlink(source_path, destination_path) {
        Ok(()) => Some(LinkMethod::Softlink),
        Err(err) => {
            tracing::debug!(
                "softlink of {} failed ({err}), copying instead",
                source_path.display()
            );
            None
        }
    }
}

/// Copies while hashing, updating the recorded hash and size.
fn copy_file(
    source_path: &Path,
    destination_path: &Path,
    sha256: &mut Option<Sha256Hash>,
    file_size: &mut Option<u64>,
) -> Result<LinkMethod, LinkFileError> {
    let mut source =
        fs_err::File::open(source_path).map_err(LinkFileError::FailedToReadSourceFile)?;
    let destination = fs_err::File::create(destination_path)
        .map_err(LinkFileError::FailedToWriteDestination)?;
    let mut writer = HashingWriter::<_, Sha256>::new(destination);
    let copied = std::io::copy(&mut source, &mut writer)
        .map_err(LinkFileError::FailedToWriteDestination)?;
    let (_, hash) = writer.finalize();
    *sha256 = Some(hash);
    *file_size = Some(copied);
    copy_permissions(source_path, destination_path);
    Ok(LinkMethod::Copy)
}

/// Recreates a symlink from the package in the prefix; degrades to a copy of
/// the link target when symlinks cannot be read or created.
fn relink_symlink(
    source_path: &Path,
    destination_path: &Path,
) -> Result<LinkMethod, LinkFileError> {
    match fs_err::read_link(source_path) {
        Ok(target) => match symlink(&target, destination_path) {
            Ok(()) => Ok(LinkMethod::Softlink),
            Err(err) => Err(LinkFileError::FailedToLink(LinkMethod::Softlink, err)),
        },
        Err(_) => {
            let (mut sha, mut size) = (None, None);
            copy_file(source_path, destination_path, &mut sha, &mut size)
        }
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(unix)]
fn copy_permissions(source: &Path, destination: &Path) {
    if let Ok(metadata) = source.metadata() {
        let _ = std::fs::set_permissions(destination, metadata.permissions());
    }
}

#[cfg(not(unix))]
fn copy_permissions(_source: &Path, _destination: &Path) {}

/// Memory-maps the source when possible; small or unmappable files are read
/// into memory instead.
fn map_or_read(path: &Path) -> Result<SourceBytes, LinkFileError> {
    let file = std::fs::File::open(path).map_err(LinkFileError::FailedToReadSourceFile)?;
    // SAFETY: the package cache is not modified while a transaction links
    // from it; concurrent mutation would already corrupt plain reads.
    match unsafe { Mmap::map(&file) } {
        Ok(mapped) => Ok(SourceBytes::Mapped(mapped)),
        Err(_) => {
            let bytes = fs_err::read(path).map_err(LinkFileError::FailedToReadSourceFile)?;
            Ok(SourceBytes::Read(bytes))
        }
    }
}

enum SourceBytes {
    Mapped(Mmap),
    Read(Vec<u8>),
}

impl AsRef<[u8]> for SourceBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            SourceBytes::Mapped(mapped) => mapped,
            SourceBytes::Read(bytes) => bytes,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Textual substitution: every occurrence of the placeholder becomes the
/// prefix; the file may change length.
fn copy_replacing_placeholder_text(
    source: &[u8],
    writer: &mut impl Write,
    placeholder: &[u8],
    prefix: &[u8],
) -> Result<(), LinkFileError> {
    let mut rest = source;
    while let Some(at) = find(rest, placeholder) {
        writer
            .write_all(&rest[..at])
            .and_then(|()| writer.write_all(prefix))
            .map_err(LinkFileError::FailedToWriteDestination)?;
        rest = &rest[at + placeholder.len()..];
    }
    writer
        .write_all(rest)
        .map_err(LinkFileError::FailedToWriteDestination)
}

/// Binary substitution: the placeholder lives inside NUL-terminated strings
/// baked into the binary, so the replacement pads with NULs to keep every
/// offset (and the total file length) intact.
fn copy_replacing_placeholder_binary(
    source: &[u8],
    writer: &mut impl Write,
    placeholder: &[u8],
    prefix: &[u8],
) -> Result<(), LinkFileError> {
    if prefix.len() > placeholder.len() {
        return Err(LinkFileError::PrefixTooLong);
    }
    let padding = vec![0u8; placeholder.len() - prefix.len()];

    let mut pos = 0;
    while let Some(found) = find(&source[pos..], placeholder) {
        let at = pos + found;
        // The enclosing C string ends at the next NUL byte.
        let cstring_end = source[at..]
            .iter()
            .position(|&byte| byte == 0)
            .map_or(source.len(), |offset| at + offset);

        writer
            .write_all(&source[pos..at])
            .and_then(|()| writer.write_all(prefix))
            .and_then(|()| writer.write_all(&source[at + placeholder.len()..cstring_end]))
            .and_then(|()| writer.write_all(&padding))
            .map_err(LinkFileError::FailedToWriteDestination)?;
        pos = cstring_end;
    }
    writer
        .write_all(&source[pos..])
        .map_err(LinkFileError::FailedToWriteDestination)
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::package::PathsEntry;

    fn entry(relative_path: &str) -> PathsEntry {
        PathsEntry {
            relative_path: relative_path.into(),
            path_type: PathType::HardLink,
            file_mode: None,
            prefix_placeholder: None,
            no_link: false,
            sha256: None,
            size_in_bytes: None,
        }
    }

    fn write_source(package_dir: &Path, relative: &str, content: &[u8]) {
        let path = package_dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_text_placeholder_substitution() {
        let text = b"#!/opt/placeholder/bin/python\ndata=/opt/placeholder/share\n";
        let package = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_source(package.path(), "bin/script", text);

        let mut entry = entry("bin/script");
        entry.prefix_placeholder = Some("/opt/placeholder".to_string());
        entry.file_mode = Some(FileMode::Text);

        let linked = link_file(
            NoArchType::none(),
            &entry,
            package.path(),
            prefix.path(),
            "/envs/test",
            &InstallOptions::default(),
            None,
        )
        .unwrap();

        assert_eq!(linked.method, LinkMethod::Patched(FileMode::Text));
        let content = std::fs::read_to_string(prefix.path().join("bin/script")).unwrap();
        assert_eq!(content, "#!/envs/test/bin/python\ndata=/envs/test/share\n");
        // The recorded hash matches the *linked* content.
        assert_eq!(
            linked.sha256.unwrap(),
            krait_digest::compute_bytes_digest::<Sha256>(content.as_bytes())
        );
    }

    #[test]
    fn test_binary_placeholder_preserves_length() {
        // A fake binary with an embedded NUL-terminated path.
        let mut binary = b"\x7fELF-ish ".to_vec();
        binary.extend_from_slice(b"/opt/a-rather-long-placeholder/lib\0trailing bytes");
        let original_len = binary.len();

        let package = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_source(package.path(), "lib/libfoo.so", &binary);

        let mut entry = entry("lib/libfoo.so");
        entry.prefix_placeholder = Some("/opt/a-rather-long-placeholder".to_string());
        entry.file_mode = Some(FileMode::Binary);

        let linked = link_file(
            NoArchType::none(),
            &entry,
            package.path(),
            prefix.path(),
            "/envs/t",
            &InstallOptions::default(),
            None,
        )
        .unwrap();

        let content = std::fs::read(prefix.path().join("lib/libfoo.so")).unwrap();
        assert_eq!(content.len(), original_len);
        assert_eq!(linked.file_size, Some(original_len as u64));
        // The new path is present, NUL-terminated at the same spot.
        let needle = b"/envs/t/lib\0";
        assert!(content
            .windows(needle.len())
            .any(|window| window == needle));
        assert!(content.ends_with(b"trailing bytes"));
    }

    #[test]
    fn test_binary_placeholder_too_short_is_an_error() {
        let package = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_source(package.path(), "lib/x", b"/p\0");

        let mut entry = entry("lib/x");
        entry.prefix_placeholder = Some("/p".to_string());
        entry.file_mode = Some(FileMode::Binary);

        let result = link_file(
            NoArchType::none(),
            &entry,
            package.path(),
            prefix.path(),
            "/a-much-longer-real-prefix",
            &InstallOptions::default(),
            None,
        );
        assert!(matches!(result, Err(LinkFileError::PrefixTooLong)));
    }

    #[test]
    fn test_hardlink_is_the_default_method() {
        let package = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_source(package.path(), "share/data", b"payload");

        let linked = link_file(
            NoArchType::none(),
            &entry("share/data"),
            package.path(),
            prefix.path(),
            "/envs/test",
            &InstallOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(linked.method, LinkMethod::Hardlink);
        assert!(prefix.path().join("share/data").is_file());
    }

    /// `/dev/shm` is a separate tmpfs mount on linux, so hard links from a
    /// package stored there into the default temp directory fail with
    /// `EXDEV`, exercising the hardlink > softlink > copy cascade at
    /// runtime.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_hardlink_failure_falls_back_to_softlink_then_copy() {
        use std::os::unix::fs::MetadataExt;

        let Ok(package) = tempfile::tempdir_in("/dev/shm") else {
            return;
        };
        let prefix = tempfile::tempdir().unwrap();
        if package.path().metadata().unwrap().dev() == prefix.path().metadata().unwrap().dev() {
            // Both directories on one filesystem; the failure cannot be
            // forced here.
            return;
        }
        write_source(package.path(), "share/data", b"payload");

        // Softlink is the next method in the cascade.
        let linked = link_file(
            NoArchType::none(),
            &entry("share/data"),
            package.path(),
            prefix.path(),
            "/envs/test",
            &InstallOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(linked.method, LinkMethod::Softlink);
        let destination = prefix.path().join("share/data");
        assert!(destination
            .symlink_metadata()
            .unwrap()
            .file_type()
            .is_symlink());
        assert_eq!(std::fs::read(&destination).unwrap(), b"payload");

        // With symlinks disallowed the cascade ends in a copy.
        std::fs::remove_file(&destination).unwrap();
        let options = InstallOptions {
            allow_symbolic_links: false,
            ..InstallOptions::default()
        };
        let linked = link_file(
            NoArchType::none(),
            &entry("share/data"),
            package.path(),
            prefix.path(),
            "/envs/test",
            &options,
            None,
        )
        .unwrap();
        assert_eq!(linked.method, LinkMethod::Copy);
        assert_eq!(std::fs::read(&destination).unwrap(), b"payload");
    }

    #[test]
    fn test_always_copy_forces_copies() {
        let package = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_source(package.path(), "share/data", b"payload");

        let options = InstallOptions {
            always_copy: true,
            ..InstallOptions::default()
        };
        let linked = link_file(
            NoArchType::none(),
            &entry("share/data"),
            package.path(),
            prefix.path(),
            "/envs/test",
            &options,
            None,
        )
        .unwrap();
        assert_eq!(linked.method, LinkMethod::Copy);
        assert_eq!(linked.file_size, Some(7));
    }

    #[test]
    fn test_noarch_python_requires_python_info() {
        let package = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_source(package.path(), "site-packages/foo.py", b"pass\n");

        let result = link_file(
            NoArchType::python(),
            &entry("site-packages/foo.py"),
            package.path(),
            prefix.path(),
            "/envs/test",
            &InstallOptions::default(),
            None,
        );
        assert!(matches!(result, Err(LinkFileError::MissingPythonInfo)));
    }

    #[test]
    fn test_noarch_python_paths_are_rewritten() {
        use krait_conda_types::PackageName;

        let package = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_source(package.path(), "site-packages/foo.py", b"pass\n");

        let python_record = krait_conda_types::PackageRecord::new(
            PackageName::new_unchecked("python"),
            "3.9.2".parse().unwrap(),
            "h1_0",
        );
        let python_info =
            PythonInfo::from_record(&python_record, Platform::Linux64).unwrap();

        let linked = link_file(
            NoArchType::python(),
            &entry("site-packages/foo.py"),
            package.path(),
            prefix.path(),
            "/envs/test",
            &InstallOptions::default(),
            Some(&python_info),
        )
        .unwrap();
        assert_eq!(
            linked.relative_path,
            Path::new("lib/python3.9/site-packages/foo.py")
        );
        assert!(prefix
            .path()
            .join("lib/python3.9/site-packages/foo.py")
            .is_file());
    }
}
