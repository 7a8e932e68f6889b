// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 上传文件模块
//!
//! `UploadedFile` 描述一次上传中的单个文件：客户端提供的元数据、上传错误码，
//! 以及文件内容的来源（延迟打开的文件路径或已打开的流）。
//!
//! ## 状态机
//! - `Pending → Moved`：`move_to` 成功后单向进入，之后 `stream()` 与 `move_to` 都会失败。
//! - `Pending → StreamRetrieved`：取得流之后仍可以 `move_to`，直到被移动为止。
//!
//! 克隆出的句柄共享同一份状态，因此移动标记对所有克隆可见。

use crate::{
    exception::{Exception, Result},
    param::UPLOAD_CHUNK_SIZE,
    stream::Stream,
};
use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;
use serde_derive::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

lazy_static! {
    /// type/subtype[+suffix][;param=value...]
    static ref MEDIA_TYPE: Regex = Regex::new(
        r#"^[A-Za-z0-9][A-Za-z0-9!#$&^_.-]*/[A-Za-z0-9][A-Za-z0-9!#$&^_.-]*(?:\+[A-Za-z0-9][A-Za-z0-9!#$&^_.-]*)?(?:\s*;\s*[A-Za-z0-9!#$&^_.+-]+=(?:"[^"]*"|[^;\s"]*))*\s*$"#
    )
    .unwrap();
}

/// 上传错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    /// 上传成功
    Ok,
    /// 超出服务器允许的最大文件大小
    IniSize,
    /// 超出表单声明的最大文件大小
    FormSize,
    /// 只上传了一部分
    Partial,
    /// 没有文件被上传
    NoFile,
    /// 缺少临时目录
    NoTmpDir,
    /// 写入磁盘失败
    CantWrite,
    /// 被服务器扩展中止
    Extension,
}

impl UploadError {
    pub fn code(&self) -> i64 {
        match self {
            UploadError::Ok => 0,
            UploadError::IniSize => 1,
            UploadError::FormSize => 2,
            UploadError::Partial => 3,
            UploadError::NoFile => 4,
            UploadError::NoTmpDir => 6,
            UploadError::CantWrite => 7,
            UploadError::Extension => 8,
        }
    }

    /// 错误码对应的固定英文描述；成功时为空串
    pub fn message(&self) -> &'static str {
        match self {
            UploadError::Ok => "",
            UploadError::IniSize => {
                "The uploaded file exceeds the maximum file size allowed by the server"
            }
            UploadError::FormSize => {
                "The uploaded file exceeds the MAX_FILE_SIZE directive that was specified in the HTML form"
            }
            UploadError::Partial => "The uploaded file was only partially uploaded",
            UploadError::NoFile => "No file was uploaded",
            UploadError::NoTmpDir => "Missing a temporary folder",
            UploadError::CantWrite => "Failed to write file to disk",
            UploadError::Extension => "A server extension stopped the file upload",
        }
    }
}

impl TryFrom<i64> for UploadError {
    type Error = Exception;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(UploadError::Ok),
            1 => Ok(UploadError::IniSize),
            2 => Ok(UploadError::FormSize),
            3 => Ok(UploadError::Partial),
            4 => Ok(UploadError::NoFile),
            6 => Ok(UploadError::NoTmpDir),
            7 => Ok(UploadError::CantWrite),
            8 => Ok(UploadError::Extension),
            _ => Err(Exception::invalid(format!(
                "Invalid error status for UploadedFile; must be an UPLOAD_ERR_* constant, {} given",
                code
            ))),
        }
    }
}

/// 上传文件内容的来源
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// 延迟打开的临时文件路径
    FilePath(PathBuf),
    /// 已打开的流
    Stream(Stream),
}

impl From<Stream> for UploadSource {
    fn from(stream: Stream) -> Self {
        UploadSource::Stream(stream)
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        UploadSource::FilePath(path)
    }
}

impl From<&Path> for UploadSource {
    fn from(path: &Path) -> Self {
        UploadSource::FilePath(path.to_path_buf())
    }
}

impl From<&str> for UploadSource {
    fn from(path: &str) -> Self {
        UploadSource::FilePath(PathBuf::from(path))
    }
}

/// 单个上传文件的原始描述（`tmp_name`、`size`、`error`、`name`、`type`、`full_path`）
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UploadedFileSpec {
    #[serde(default)]
    pub tmp_name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub error: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub full_path: Option<String>,
}

/// 把上传的临时文件移动到目标位置的底层原语
#[cfg_attr(test, mockall::automock)]
pub trait FileMover {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// 命令行环境：直接重命名，跨设备时退化为复制后删除
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameMover;

impl FileMover for RenameMover {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                debug!("重命名{}失败（{}），尝试复制后删除", from.display(), rename_err);
                if fs::copy(from, to).is_err() {
                    return Err(rename_err);
                }
                fs::remove_file(from)
            }
        }
    }
}

/// 服务端环境：只移动位于上传目录中的文件
#[derive(Debug, Clone)]
pub struct UploadDirMover {
    upload_dir: PathBuf,
}

impl UploadDirMover {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }
}

impl FileMover for UploadDirMover {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        let dir = fs::canonicalize(&self.upload_dir)?;
        let source = fs::canonicalize(from)?;
        if !source.starts_with(&dir) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not a valid uploaded file", from.display()),
            ));
        }
        RenameMover.move_file(&source, to)
    }
}

#[derive(Debug)]
struct UploadState {
    file: Option<PathBuf>,
    stream: Option<Stream>,
    moved: bool,
}

/// 上传的单个文件
#[derive(Debug, Clone)]
pub struct UploadedFile {
    client_filename: Option<String>,
    client_full_path: Option<String>,
    client_media_type: Option<String>,
    error: UploadError,
    size: Option<u64>,
    state: Arc<Mutex<UploadState>>,
}

fn assert_client_filename(name: &str) -> Result<()> {
    if name.contains(['/', '\r', '\n', '\0']) {
        return Err(Exception::invalid(format!(
            "Invalid client filename provided: {}",
            name.escape_debug()
        )));
    }
    Ok(())
}

fn assert_media_type(media_type: &str) -> Result<()> {
    if MEDIA_TYPE.is_match(media_type) {
        return Ok(());
    }
    Err(Exception::invalid(format!(
        "Invalid client media type provided: {}",
        media_type
    )))
}

impl UploadedFile {
    /// 构造上传文件并校验各项元数据。
    ///
    /// 错误码为成功时必须提供内容来源：路径来源在未给出大小时按文件系统回填，
    /// 流来源的大小从流中读取。
    pub fn new(
        source: Option<UploadSource>,
        size: Option<u64>,
        error: i64,
        client_filename: Option<&str>,
        client_media_type: Option<&str>,
        client_full_path: Option<&str>,
    ) -> Result<Self> {
        let error = UploadError::try_from(error)?;
        if let Some(name) = client_filename {
            assert_client_filename(name)?;
        }
        let client_media_type = client_media_type.filter(|t| !t.is_empty());
        if let Some(media_type) = client_media_type {
            assert_media_type(media_type)?;
        }

        let mut state = UploadState {
            file: None,
            stream: None,
            moved: false,
        };
        let mut size = size;
        if error == UploadError::Ok {
            match source {
                Some(UploadSource::FilePath(path)) => {
                    if path.as_os_str().is_empty() {
                        return Err(Exception::invalid(
                            "Invalid stream or file provided for UploadedFile",
                        ));
                    }
                    if size.is_none() {
                        size = fs::metadata(&path).ok().map(|m| m.len());
                    }
                    state.file = Some(path);
                }
                Some(UploadSource::Stream(stream)) => {
                    size = stream.get_size().or(size);
                    state.stream = Some(stream);
                }
                None => {
                    return Err(Exception::invalid(
                        "Invalid stream or file provided for UploadedFile",
                    ))
                }
            }
        }

        Ok(Self {
            client_filename: client_filename.map(String::from),
            client_full_path: client_full_path.map(String::from),
            client_media_type: client_media_type.map(String::from),
            error,
            size,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// 由原始描述构造，`tmp_name` 作为延迟打开的文件路径
    pub fn from_spec(spec: &UploadedFileSpec) -> Result<Self> {
        let source = spec
            .tmp_name
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(UploadSource::from);
        Self::new(
            source,
            spec.size,
            spec.error,
            spec.name.as_deref(),
            spec.media_type.as_deref(),
            spec.full_path.as_deref(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, UploadState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("上传文件的状态锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }
}

// --- Getter 访问器实现 ---

impl UploadedFile {
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn error(&self) -> UploadError {
        self.error
    }

    /// 错误码的描述；上传成功时为空串
    pub fn error_message(&self) -> &'static str {
        self.error.message()
    }

    pub fn client_filename(&self) -> Option<&str> {
        self.client_filename.as_deref()
    }

    pub fn client_media_type(&self) -> Option<&str> {
        self.client_media_type.as_deref()
    }

    pub fn client_full_path(&self) -> Option<&str> {
        self.client_full_path.as_deref()
    }

    pub fn is_moved(&self) -> bool {
        self.lock().moved
    }
}

// --- 流与移动 ---

impl UploadedFile {
    /// 取得文件内容的流。路径来源在首次调用时以只读方式打开
    pub fn stream(&self) -> Result<Stream> {
        let mut state = self.lock();
        if state.moved {
            return Err(Exception::runtime(
                "Cannot retrieve stream after it has already been moved",
            ));
        }
        if let Some(stream) = &state.stream {
            return Ok(stream.clone());
        }
        match state.file.clone() {
            Some(path) => {
                let stream = Stream::from_path(&path, "r")?;
                state.stream = Some(stream.clone());
                Ok(stream)
            }
            None => Err(Exception::runtime(format!(
                "No stream is available for this upload ({})",
                self.error.message()
            ))),
        }
    }

    /// 使用默认策略（直接重命名）移动文件
    pub fn move_to(&self, target: impl AsRef<Path>) -> Result<()> {
        self.move_to_with(target, &RenameMover, UPLOAD_CHUNK_SIZE)
    }

    /// 把上传文件移动到 `target`。
    ///
    /// # 逻辑步骤
    /// 1. 检查错误码为成功、尚未移动、目标路径非空且所在目录可写。
    /// 2. 路径来源交给 `mover` 完成移动；流来源按 `chunk_size` 分块复制到目标文件。
    /// 3. 只有在移动完全成功后才标记为已移动。
    pub fn move_to_with(
        &self,
        target: impl AsRef<Path>,
        mover: &dyn FileMover,
        chunk_size: usize,
    ) -> Result<()> {
        let target = target.as_ref();
        if self.error != UploadError::Ok {
            return Err(Exception::runtime(format!(
                "Cannot move file due to upload error: {}",
                self.error.message()
            )));
        }
        let mut state = self.lock();
        if state.moved {
            return Err(Exception::runtime("Cannot move file; already moved!"));
        }
        if target.as_os_str().is_empty() {
            return Err(Exception::invalid(
                "Invalid path provided for move operation; must be a non-empty string",
            ));
        }
        assert_target_directory(target)?;

        if let Some(source) = state.file.clone() {
            if let Err(e) = mover.move_file(&source, target) {
                error!("移动上传文件{}到{}失败：{}", source.display(), target.display(), e);
                return Err(Exception::runtime(format!(
                    "Error moving uploaded file {} to {}: {}",
                    source.display(),
                    target.display(),
                    e
                )));
            }
        } else if let Some(stream) = state.stream.clone() {
            copy_stream(&stream, target, chunk_size.max(1))?;
        } else {
            return Err(Exception::runtime("No stream is available for this upload"));
        }

        state.moved = true;
        info!("上传文件已移动到{}", target.display());
        Ok(())
    }
}

fn assert_target_directory(target: &Path) -> Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let writable = fs::metadata(dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false);
    if !writable {
        return Err(Exception::runtime(format!(
            "The target directory `{}` does not exist or is not writable",
            dir.display()
        )));
    }
    Ok(())
}

fn copy_stream(source: &Stream, target: &Path, chunk_size: usize) -> Result<()> {
    if source.is_seekable() {
        source.rewind()?;
    }
    let destination = Stream::from_path(target, "wb")?;
    loop {
        let chunk = source.read(chunk_size)?;
        if chunk.is_empty() {
            break;
        }
        destination.write(&chunk)?;
        if chunk.len() < chunk_size {
            break;
        }
    }
    destination.close();
    Ok(())
}
