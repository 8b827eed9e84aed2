//! File tools confined to the scratch-pad directory.

use crate::tool::{Tool, ToolArgs, ToolError, parameters_for, parse_args};
use anyhow::Context;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing::info;

/// The directory the file tools read and write.
#[derive(Debug, Clone)]
pub struct ScratchPad {
    root: PathBuf,
}

impl ScratchPad {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a file name to its path. Only plain names are accepted.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, ToolError> {
        let name = file_name.trim();
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
            || Path::new(name).is_absolute()
        {
            return Err(ToolError::InvalidFileName(file_name.to_string()));
        }
        Ok(self.root.join(name))
    }

    async fn exists(path: &Path) -> anyhow::Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("failed to inspect {}", path.display()))
    }
}

/// Arguments for writing a scratch-pad file.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct WriteFileArgs {
    /// Name of the file inside the scratch pad, without directories.
    pub file_name: String,
    /// Full text content of the file.
    pub content: String,
}

/// Arguments for deleting a scratch-pad file.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct DeleteFileArgs {
    /// Name of the file inside the scratch pad, without directories.
    pub file_name: String,
    /// Delete without asking for confirmation. Only set after the user confirmed.
    #[serde(default)]
    pub force_delete: bool,
}

pub struct CreateFile {
    scratch_pad: ScratchPad,
}

impl CreateFile {
    pub fn new(scratch_pad: ScratchPad) -> Self {
        Self { scratch_pad }
    }
}

#[async_trait]
impl Tool for CreateFile {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Creates a new file in the scratch pad with the given content."
    }

    fn parameters(&self) -> Value {
        parameters_for::<WriteFileArgs>()
    }

    async fn invoke(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let args: WriteFileArgs = parse_args(args)?;
        let path = self.scratch_pad.resolve(&args.file_name)?;
        if ScratchPad::exists(&path).await? {
            return Ok(json!({ "status": "file already exists", "file_name": args.file_name }));
        }
        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(file = %path.display(), "Created scratch-pad file.");
        Ok(json!({ "status": "file created", "file_name": args.file_name }))
    }
}

pub struct UpdateFile {
    scratch_pad: ScratchPad,
}

impl UpdateFile {
    pub fn new(scratch_pad: ScratchPad) -> Self {
        Self { scratch_pad }
    }
}

#[async_trait]
impl Tool for UpdateFile {
    fn name(&self) -> &str {
        "update_file"
    }

    fn description(&self) -> &str {
        "Replaces the content of an existing scratch-pad file."
    }

    fn parameters(&self) -> Value {
        parameters_for::<WriteFileArgs>()
    }

    async fn invoke(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let args: WriteFileArgs = parse_args(args)?;
        let path = self.scratch_pad.resolve(&args.file_name)?;
        if !ScratchPad::exists(&path).await? {
            return Ok(json!({ "status": "File does not exist", "file_name": args.file_name }));
        }
        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(file = %path.display(), "Updated scratch-pad file.");
        Ok(json!({ "status": "File updated", "file_name": args.file_name }))
    }
}

/// Deletes a file, but only after the model has asked the user to confirm.
pub struct DeleteFile {
    scratch_pad: ScratchPad,
}

impl DeleteFile {
    pub fn new(scratch_pad: ScratchPad) -> Self {
        Self { scratch_pad }
    }
}

#[async_trait]
impl Tool for DeleteFile {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Deletes a scratch-pad file. Without force_delete it only asks for confirmation."
    }

    fn parameters(&self) -> Value {
        parameters_for::<DeleteFileArgs>()
    }

    async fn invoke(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let args: DeleteFileArgs = parse_args(args)?;
        let path = self.scratch_pad.resolve(&args.file_name)?;
        if !ScratchPad::exists(&path).await? {
            return Ok(json!({ "status": "File does not exist", "file_name": args.file_name }));
        }
        if !args.force_delete {
            return Ok(json!({
                "status": "Confirmation required",
                "file_name": args.file_name,
                "message": format!(
                    "Are you sure you want to delete '{}'? Say force delete if you want to delete.",
                    args.file_name
                ),
            }));
        }
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to delete {}", path.display()))?;
        info!(file = %path.display(), "Deleted scratch-pad file.");
        Ok(json!({ "status": "File deleted", "file_name": args.file_name }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> ToolArgs {
        match value {
            Value::Object(map) => map,
            _ => panic!("test arguments must be an object"),
        }
    }

    #[test]
    fn test_resolve_rejects_paths() {
        let pad = ScratchPad::new("/tmp/pad");
        assert_eq!(pad.resolve("notes.txt").unwrap(), Path::new("/tmp/pad/notes.txt"));
        for bad in ["", "  ", "../secret", "a/b.txt", "a\\b.txt", "/etc/passwd", ".."] {
            assert!(
                matches!(pad.resolve(bad), Err(ToolError::InvalidFileName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let dir = tempfile::tempdir().unwrap();
        let pad = ScratchPad::new(dir.path());
        let create = CreateFile::new(pad.clone());
        let update = UpdateFile::new(pad);

        let out = create
            .invoke(args(json!({ "file_name": "a.md", "content": "one" })))
            .await
            .unwrap();
        assert_eq!(out["status"], "file created");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.md")).unwrap(), "one");

        let out = create
            .invoke(args(json!({ "file_name": "a.md", "content": "two" })))
            .await
            .unwrap();
        assert_eq!(out["status"], "file already exists");

        let out = update
            .invoke(args(json!({ "file_name": "a.md", "content": "two" })))
            .await
            .unwrap();
        assert_eq!(out["status"], "File updated");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.md")).unwrap(), "two");

        let out = update
            .invoke(args(json!({ "file_name": "missing.md", "content": "x" })))
            .await
            .unwrap();
        assert_eq!(out["status"], "File does not exist");
    }

    #[tokio::test]
    async fn test_delete_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), "bye").unwrap();
        let delete = DeleteFile::new(ScratchPad::new(dir.path()));

        let out = delete
            .invoke(args(json!({ "file_name": "old.txt" })))
            .await
            .unwrap();
        assert_eq!(out["status"], "Confirmation required");
        assert!(out["message"].as_str().unwrap().contains("'old.txt'"));
        assert!(dir.path().join("old.txt").exists());

        let out = delete
            .invoke(args(json!({ "file_name": "old.txt", "force_delete": true })))
            .await
            .unwrap();
        assert_eq!(out["status"], "File deleted");
        assert!(!dir.path().join("old.txt").exists());

        let out = delete
            .invoke(args(json!({ "file_name": "old.txt", "force_delete": true })))
            .await
            .unwrap();
        assert_eq!(out["status"], "File does not exist");
    }

    #[tokio::test]
    async fn test_traversal_and_missing_arguments_fail() {
        let dir = tempfile::tempdir().unwrap();
        let create = CreateFile::new(ScratchPad::new(dir.path()));

        let err = create
            .invoke(args(json!({ "file_name": "../escape.txt", "content": "x" })))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid file name"));

        let err = create.invoke(ToolArgs::new()).await.unwrap_err();
        assert!(err.to_string().contains("invalid arguments"));
    }

    #[test]
    fn test_delete_schema_marks_force_optional() {
        let schema = parameters_for::<DeleteFileArgs>();
        assert_eq!(schema["required"], json!(["file_name"]));
        assert_eq!(schema["properties"]["force_delete"]["type"], "boolean");
    }
}
