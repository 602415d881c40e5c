//! Dependency-graph extractor
//!
//! Regex-based import resolution over the indexed chunks of a repository.
//! Only imports that resolve to another analyzed file become edges, so the
//! graph never references files outside the corpus.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const JS_EXTENSIONS: [&str; 6] = [".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs"];

fn py_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*import\s+([^\n#]+)").expect("valid pattern"))
}

fn py_from_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*from\s+([a-zA-Z0-9_\.]+)\s+import\s+").expect("valid pattern")
    })
}

fn js_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:import|export)\s+(?:[^'"]+?\s+from\s+)?['"]([^'"]+)['"]"#)
            .expect("valid pattern")
    })
}

fn js_require_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid pattern"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub files_considered: usize,
    pub edges_detected: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub stats: GraphStats,
}

fn dirname(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Collapse `.` and `..` segments the way `posixpath.normpath` does.
fn normpath(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        normpath(rel)
    } else {
        normpath(&format!("{base}/{rel}"))
    }
}

fn resolve_python_import(
    source_file: &str,
    imported_module: &str,
    files: &BTreeSet<String>,
) -> Option<String> {
    let candidate = imported_module.trim_matches('.').replace('.', "/");
    if candidate.is_empty() {
        return None;
    }

    let candidate_file = format!("{candidate}.py");
    if files.contains(&candidate_file) {
        return Some(candidate_file);
    }

    let package_init = format!("{candidate}/__init__.py");
    if files.contains(&package_init) {
        return Some(package_init);
    }

    let source_dir = dirname(source_file);
    if !source_dir.is_empty() {
        let local_candidate = join(source_dir, &candidate_file);
        if files.contains(&local_candidate) {
            return Some(local_candidate);
        }
    }

    None
}

fn resolve_js_import(
    source_file: &str,
    imported_ref: &str,
    files: &BTreeSet<String>,
) -> Option<String> {
    if !imported_ref.starts_with('.') {
        return None;
    }

    let base_path = join(dirname(source_file), imported_ref);
    let mut candidates: Vec<String> = Vec::new();

    if JS_EXTENSIONS.iter().any(|ext| base_path.ends_with(ext)) {
        candidates.push(base_path);
    } else {
        for ext in JS_EXTENSIONS {
            candidates.push(format!("{base_path}{ext}"));
            candidates.push(format!("{base_path}/index{ext}"));
        }
    }

    candidates.into_iter().find(|c| files.contains(c))
}

/// Build the dependency graph from `(file_path, content)` chunk rows.
pub fn build_dependency_graph(file_chunks: &[(String, String)]) -> DependencyGraph {
    let mut file_to_content: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (file_path, content) in file_chunks {
        let path = file_path.replace('\\', "/");
        if path.is_empty() || content.is_empty() {
            continue;
        }
        file_to_content.entry(path).or_default().push(content);
    }

    let files: BTreeSet<String> = file_to_content.keys().cloned().collect();
    let nodes: Vec<GraphNode> = files
        .iter()
        .map(|path| GraphNode {
            id: path.clone(),
            label: basename(path).to_string(),
            file_path: path.clone(),
        })
        .collect();

    let mut edge_set: BTreeSet<(String, String, String)> = BTreeSet::new();

    for (file_path, contents) in &file_to_content {
        let merged = contents.join("\n");

        if file_path.ends_with(".py") {
            for capture in py_import_re().captures_iter(&merged) {
                for module in capture[1].split(',') {
                    let mut module = module.trim();
                    if module.is_empty() {
                        continue;
                    }
                    if let Some((name, _alias)) = module.split_once(" as ") {
                        module = name.trim();
                    }
                    if let Some(target) = resolve_python_import(file_path, module, &files) {
                        if &target != file_path {
                            edge_set.insert((file_path.clone(), target, "python".to_string()));
                        }
                    }
                }
            }
            for capture in py_from_import_re().captures_iter(&merged) {
                if let Some(target) = resolve_python_import(file_path, &capture[1], &files) {
                    if &target != file_path {
                        edge_set.insert((file_path.clone(), target, "python".to_string()));
                    }
                }
            }
        }

        if JS_EXTENSIONS.iter().any(|ext| file_path.ends_with(ext)) {
            let refs = js_import_re()
                .captures_iter(&merged)
                .chain(js_require_re().captures_iter(&merged))
                .map(|c| c[1].to_string())
                .collect::<Vec<_>>();
            for import_ref in refs {
                if let Some(target) = resolve_js_import(file_path, &import_ref, &files) {
                    if &target != file_path {
                        edge_set.insert((file_path.clone(), target, "javascript".to_string()));
                    }
                }
            }
        }
    }

    let edges: Vec<GraphEdge> = edge_set
        .into_iter()
        .map(|(source, target, kind)| GraphEdge {
            id: format!("{source}->{target}"),
            source,
            target,
            kind,
        })
        .collect();

    DependencyGraph {
        stats: GraphStats {
            files_considered: nodes.len(),
            edges_detected: edges.len(),
        },
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn python_imports_resolve_to_modules() {
        let graph = build_dependency_graph(&chunks(&[
            ("app/main.py", "import app.config\nfrom app.db import session"),
            ("app/config.py", "VALUE = 1"),
            ("app/db.py", "session = None"),
        ]));
        let edge_ids: Vec<&str> = graph.edges.iter().map(|e| e.id.as_str()).collect();
        assert!(edge_ids.contains(&"app/main.py->app/config.py"));
        assert!(edge_ids.contains(&"app/main.py->app/db.py"));
        assert_eq!(graph.stats.files_considered, 3);
    }

    #[test]
    fn python_alias_imports_are_stripped() {
        let graph = build_dependency_graph(&chunks(&[
            ("main.py", "import helpers as h"),
            ("helpers.py", "def help(): pass"),
        ]));
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].target, "helpers.py");
    }

    #[test]
    fn package_init_fallback_resolves() {
        let graph = build_dependency_graph(&chunks(&[
            ("main.py", "import pkg"),
            ("pkg/__init__.py", ""),
        ]));
        // Empty content files are skipped entirely.
        assert!(graph.edges.is_empty());

        let graph = build_dependency_graph(&chunks(&[
            ("main.py", "import pkg"),
            ("pkg/__init__.py", "# package"),
        ]));
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].target, "pkg/__init__.py");
    }

    #[test]
    fn js_relative_imports_resolve_with_extension_fallback() {
        let graph = build_dependency_graph(&chunks(&[
            ("src/app.ts", "import { x } from './util'\nconst y = require('./legacy')"),
            ("src/util.ts", "export const x = 1"),
            ("src/legacy/index.js", "module.exports = {}"),
        ]));
        let edge_ids: Vec<&str> = graph.edges.iter().map(|e| e.id.as_str()).collect();
        assert!(edge_ids.contains(&"src/app.ts->src/util.ts"));
        assert!(edge_ids.contains(&"src/app.ts->src/legacy/index.js"));
        for edge in &graph.edges {
            assert_eq!(edge.kind, "javascript");
        }
    }

    #[test]
    fn bare_js_specifiers_are_ignored() {
        let graph = build_dependency_graph(&chunks(&[
            ("src/app.ts", "import React from 'react'"),
            ("src/react.ts", "export default null"),
        ]));
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn parent_relative_imports_normalize() {
        let graph = build_dependency_graph(&chunks(&[
            ("src/feature/page.tsx", "import { api } from '../api/client'"),
            ("src/api/client.ts", "export const api = {}"),
        ]));
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].target, "src/api/client.ts");
    }

    #[test]
    fn output_ordering_is_deterministic() {
        let input = chunks(&[
            ("b.py", "import a"),
            ("a.py", "import b"),
        ]);
        let first = build_dependency_graph(&input);
        let second = build_dependency_graph(&input);
        assert_eq!(
            first.nodes.iter().map(|n| &n.id).collect::<Vec<_>>(),
            second.nodes.iter().map(|n| &n.id).collect::<Vec<_>>()
        );
        assert_eq!(first.nodes[0].id, "a.py");
        assert_eq!(first.edges.len(), 2);
    }
}
