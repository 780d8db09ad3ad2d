//! Python function extractor using tree-sitter.

use std::collections::HashSet;

use tree_sitter::{Language, Node, Parser};

use super::{ExtractedFunction, FunctionExtractor};
use crate::error::ExtractError;

/// Extracts every `def` (module level, methods, nested, `async def`).
pub struct PythonExtractor {
    language: Language,
}

impl PythonExtractor {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_python::LANGUAGE.into(),
        }
    }

    fn visit(
        node: Node<'_>,
        source: &str,
        lines: &[&str],
        scope: &mut Vec<String>,
        seen: &mut HashSet<String>,
        out: &mut Vec<ExtractedFunction>,
    ) {
        match node.kind() {
            "function_definition" => {
                let Some(name) = Self::name_of(&node, source) else {
                    return;
                };
                let qualified_name = Self::qualify(scope, &name);
                let start_line = node.start_position().row as u32 + 1;
                let end_line = node.end_position().row as u32 + 1;

                // Redefinitions under the same qualified name keep the first one.
                if seen.insert(qualified_name.clone()) {
                    out.push(ExtractedFunction {
                        name: name.clone(),
                        qualified_name,
                        code: Self::line_span(lines, start_line, end_line),
                        start_line,
                        end_line,
                    });
                }

                scope.push(name);
                Self::visit_children(node, source, lines, scope, seen, out);
                scope.pop();
            }
            "class_definition" => {
                let Some(name) = Self::name_of(&node, source) else {
                    return;
                };
                scope.push(name);
                Self::visit_children(node, source, lines, scope, seen, out);
                scope.pop();
            }
            _ => Self::visit_children(node, source, lines, scope, seen, out),
        }
    }

    fn visit_children(
        node: Node<'_>,
        source: &str,
        lines: &[&str],
        scope: &mut Vec<String>,
        seen: &mut HashSet<String>,
        out: &mut Vec<ExtractedFunction>,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            Self::visit(child, source, lines, scope, seen, out);
        }
    }

    fn name_of(node: &Node<'_>, source: &str) -> Option<String> {
        node.child_by_field_name("name")
            .map(|n| source[n.byte_range()].to_string())
    }

    fn qualify(scope: &[String], name: &str) -> String {
        if scope.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", scope.join("."), name)
        }
    }

    fn line_span(lines: &[&str], start_line: u32, end_line: u32) -> String {
        let start = start_line.saturating_sub(1) as usize;
        let end = (end_line as usize).min(lines.len());
        lines.get(start..end).map(|l| l.join("\n")).unwrap_or_default()
    }

    /// Line of the first error or missing node, 1-based.
    fn first_error_line(node: Node<'_>) -> Option<u32> {
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row as u32 + 1);
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        children
            .into_iter()
            .filter(|c| c.has_error())
            .find_map(Self::first_error_line)
    }
}

impl Default for PythonExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionExtractor for PythonExtractor {
    fn language(&self) -> &'static str {
        "Python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn extract(&self, source: &str) -> Result<Vec<ExtractedFunction>, ExtractError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| ExtractError::Parser(e.to_string()))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ExtractError::Parser("parser returned no tree".to_string()))?;

        let root = tree.root_node();
        if root.has_error() {
            let line = Self::first_error_line(root).unwrap_or(1);
            return Err(ExtractError::Syntax { line });
        }

        let lines: Vec<&str> = source.lines().collect();
        let mut functions = Vec::new();
        let mut seen = HashSet::new();
        let mut scope = Vec::new();
        Self::visit(root, source, &lines, &mut scope, &mut seen, &mut functions);
        Ok(functions)
    }
}
