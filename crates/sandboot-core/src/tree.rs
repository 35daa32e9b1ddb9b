//! Project tree wire format and mount transform.
//!
//! The UI and persistence layers exchange a recursive folder/file structure.
//! The sandbox mount primitive expects a flat path→content map. The
//! transform between the two is the first step of every bootstrap run;
//! malformed input here is fatal to the run.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node in the project tree as the UI exchanges it.
///
/// Folders are `{folderName, items}`; files are
/// `{filename, fileExtension, content}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProjectNode {
    /// A folder containing other nodes.
    Folder {
        #[serde(rename = "folderName")]
        folder_name: String,
        items: Vec<ProjectNode>,
    },
    /// A file with content.
    File {
        filename: String,
        #[serde(rename = "fileExtension")]
        file_extension: String,
        content: String,
    },
}

impl ProjectNode {
    /// Flatten the tree into the path→content map the mount primitive
    /// expects.
    ///
    /// The root node's own name is not part of the produced paths: a root
    /// folder maps its items directly into the workspace root. Empty names
    /// and path-traversal components are rejected.
    pub fn flatten(&self) -> CoreResult<BTreeMap<String, String>> {
        let mut files = BTreeMap::new();
        match self {
            ProjectNode::Folder { items, .. } => {
                for item in items {
                    item.collect("", &mut files)?;
                }
            }
            ProjectNode::File { .. } => {
                self.collect("", &mut files)?;
            }
        }
        Ok(files)
    }

    fn collect(&self, prefix: &str, files: &mut BTreeMap<String, String>) -> CoreResult<()> {
        match self {
            ProjectNode::Folder { folder_name, items } => {
                validate_name(folder_name)?;
                let prefix = join(prefix, folder_name);
                for item in items {
                    item.collect(&prefix, files)?;
                }
                Ok(())
            }
            ProjectNode::File {
                filename,
                file_extension,
                content,
            } => {
                validate_name(filename)?;
                let name = file_name(filename, file_extension)?;
                files.insert(join(prefix, &name), content.clone());
                Ok(())
            }
        }
    }
}

/// Compose a file name from the name and extension fields.
///
/// Some persisted trees already carry the extension inside `filename`; in
/// that case it is not appended twice.
fn file_name(filename: &str, file_extension: &str) -> CoreResult<String> {
    if file_extension.is_empty() || filename.ends_with(&format!(".{file_extension}")) {
        Ok(filename.to_string())
    } else {
        validate_name(file_extension)?;
        Ok(format!("{filename}.{file_extension}"))
    }
}

fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::transform("empty file or folder name"));
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(CoreError::transform(format!(
            "illegal path component: '{name}'"
        )));
    }
    Ok(())
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, ext: &str, content: &str) -> ProjectNode {
        ProjectNode::File {
            filename: name.to_string(),
            file_extension: ext.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_flatten_nested_tree() {
        let tree = ProjectNode::Folder {
            folder_name: "my-app".to_string(),
            items: vec![
                file("package", "json", "{}"),
                ProjectNode::Folder {
                    folder_name: "src".to_string(),
                    items: vec![file("index", "js", "console.log(1)")],
                },
            ],
        };

        let files = tree.flatten().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files.get("package.json").map(String::as_str), Some("{}"));
        assert_eq!(
            files.get("src/index.js").map(String::as_str),
            Some("console.log(1)")
        );
    }

    #[test]
    fn test_flatten_root_name_excluded() {
        let tree = ProjectNode::Folder {
            folder_name: "root".to_string(),
            items: vec![file("index", "html", "<h1>hi</h1>")],
        };
        let files = tree.flatten().unwrap();
        assert!(files.contains_key("index.html"));
        assert!(!files.keys().any(|k| k.starts_with("root/")));
    }

    #[test]
    fn test_filename_already_has_extension() {
        let tree = ProjectNode::Folder {
            folder_name: "root".to_string(),
            items: vec![file("index.html", "html", "x")],
        };
        let files = tree.flatten().unwrap();
        assert!(files.contains_key("index.html"));
    }

    #[test]
    fn test_flatten_rejects_traversal() {
        let tree = ProjectNode::Folder {
            folder_name: "root".to_string(),
            items: vec![ProjectNode::Folder {
                folder_name: "..".to_string(),
                items: vec![file("evil", "sh", "rm -rf /")],
            }],
        };
        assert!(matches!(tree.flatten(), Err(CoreError::Transform(_))));
    }

    #[test]
    fn test_flatten_rejects_empty_name() {
        let tree = ProjectNode::Folder {
            folder_name: "root".to_string(),
            items: vec![file("", "js", "x")],
        };
        assert!(matches!(tree.flatten(), Err(CoreError::Transform(_))));
    }

    #[test]
    fn test_deserialize_wire_shape() {
        let json = r#"{
            "folderName": "app",
            "items": [
                {"filename": "index", "fileExtension": "html", "content": "<p>hi</p>"},
                {"folderName": "src", "items": []}
            ]
        }"#;
        let tree: ProjectNode = serde_json::from_str(json).unwrap();
        let files = tree.flatten().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("index.html"));
    }
}
