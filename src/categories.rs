// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Extension-based file categories and plan overviews

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path};

use crate::plan::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Category {
    Images,
    Videos,
    Audio,
    Docs,
    Spreadsheets,
    Presentations,
    Archives,
    Code,
    Misc,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Images => "Images",
            Category::Videos => "Videos",
            Category::Audio => "Audio",
            Category::Docs => "Docs",
            Category::Spreadsheets => "Spreadsheets",
            Category::Presentations => "Presentations",
            Category::Archives => "Archives",
            Category::Code => "Code",
            Category::Misc => "Misc",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a path, by extension
pub fn category_for(path: &Path) -> Category {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "heic" | "bmp" | "tiff" => Category::Images,
        "mp4" | "mov" | "mkv" | "webm" | "avi" => Category::Videos,
        "mp3" | "wav" | "flac" | "ogg" | "m4a" => Category::Audio,
        "pdf" | "doc" | "docx" | "odt" | "txt" | "md" | "rtf" => Category::Docs,
        "xls" | "xlsx" | "csv" | "ods" => Category::Spreadsheets,
        "ppt" | "pptx" | "odp" => Category::Presentations,
        "zip" | "7z" | "rar" | "tar" | "gz" => Category::Archives,
        "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "h" => Category::Code,
        _ => Category::Misc,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryCount {
    pub category: Category,
    pub files: usize,
}

/// Destination folder with the number of files landing directly in it
#[derive(Debug, Clone, Serialize)]
pub struct OverviewNode {
    pub name: String,
    pub files: usize,
    pub children: Vec<OverviewNode>,
}

impl OverviewNode {
    fn new(name: &str) -> Self {
        Self { name: name.to_string(), files: 0, children: Vec::new() }
    }

    fn child_mut(&mut self, name: &str) -> &mut OverviewNode {
        let idx = match self.children.iter().position(|c| c.name.eq_ignore_ascii_case(name)) {
            Some(i) => i,
            None => {
                self.children.push(OverviewNode::new(name));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }
}

/// Summary of where a plan sends files
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    /// Most common first
    pub categories: Vec<CategoryCount>,
    pub tree: OverviewNode,
    pub moves: usize,
    pub hardlinks: usize,
    pub delete_empty: usize,
}

impl Overview {
    pub fn from_plan(plan: &Plan) -> Self {
        let mut counts: HashMap<Category, usize> = HashMap::new();
        let mut tree = OverviewNode::new("Organized");

        for mv in &plan.moves {
            *counts.entry(category_for(&mv.destination)).or_default() += 1;

            let mut node = &mut tree;
            if let Some(dir) = mv.destination.parent() {
                for part in folder_parts(dir) {
                    node = node.child_mut(&part);
                }
            }
            node.files += 1;
        }

        let mut categories: Vec<CategoryCount> = counts
            .into_iter()
            .map(|(category, files)| CategoryCount { category, files })
            .collect();
        categories.sort_by(|a, b| b.files.cmp(&a.files).then(a.category.cmp(&b.category)));

        Self {
            categories,
            tree,
            moves: plan.moves.len(),
            hardlinks: plan.hardlinks.len(),
            delete_empty: plan.delete_empty.len(),
        }
    }
}

/// Folder names along `dir`, without roots or drive prefixes
fn folder_parts(dir: &Path) -> Vec<String> {
    dir.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::MoveOp;

    #[test]
    fn test_category_for() {
        assert_eq!(category_for(Path::new("a/B.JPG")), Category::Images);
        assert_eq!(category_for(Path::new("report.pdf")), Category::Docs);
        assert_eq!(category_for(Path::new("main.rs")), Category::Code);
        assert_eq!(category_for(Path::new("Makefile")), Category::Misc);
    }

    #[test]
    fn test_overview_counts() {
        let mut plan = Plan::new("organize");
        plan.moves.push(MoveOp::new("/in/a.jpg", "/out/Images/a.jpg"));
        plan.moves.push(MoveOp::new("/in/b.png", "/out/images/b.png"));
        plan.moves.push(MoveOp::new("/in/c.pdf", "/out/Docs/c.pdf"));

        let overview = Overview::from_plan(&plan);
        assert_eq!(overview.categories[0].category, Category::Images);
        assert_eq!(overview.categories[0].files, 2);
        assert_eq!(overview.moves, 3);

        let out = &overview.tree.children[0];
        assert_eq!(out.name, "out");
        assert_eq!(out.children.len(), 2);
        assert_eq!(out.children[0].files, 2);
    }
}
