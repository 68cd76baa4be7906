//! Plain-text rendering of a sidebar view

use std::fmt::Write;

use super::{Icon, SidebarNode, SidebarView};

const INDENT: &str = "  ";

fn glyph(icon: Option<Icon>) -> &'static str {
    match icon {
        Some(Icon::Python) => "🐍",
        Some(Icon::Tag) => "·",
        Some(Icon::Path) => "·",
        Some(Icon::Plugin) => "◆",
        Some(Icon::Enabled) => "✓",
        Some(Icon::Disabled) => "✗",
        Some(Icon::NotInstalled) => "⊘",
        Some(Icon::Warning) => "⚠",
        None => "▸",
    }
}

/// Render every node, expanding as it goes. Empty while loading.
pub fn render_tree(view: &SidebarView) -> String {
    let mut out = String::new();
    for root in view.roots() {
        render_node(view, &root, 0, &mut out);
    }
    out
}

fn render_node(view: &SidebarView, node: &SidebarNode, depth: usize, out: &mut String) {
    let item = view.item(node);
    let _ = write!(out, "{}{} {}", INDENT.repeat(depth), glyph(item.icon), item.label);
    if !item.detail.is_empty() {
        let _ = write!(out, ": {}", item.detail);
    }
    out.push('\n');

    if item.expandable {
        for child in view.children(node) {
            render_node(view, &child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::package::PackageKind;
    use crate::probe::{PythonPackage, PythonSetup};
    use crate::settings::ResolvedSettings;
    use crate::sidebar::SidebarState;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_loading() {
        assert_eq!(render_tree(&SidebarView::loading(ResolvedSettings::default())), "");
    }

    #[test]
    fn test_render_error() {
        let view = SidebarView::new(
            SidebarState::Error("Expected a valid virtualenv path to be set".into()),
            ResolvedSettings::default(),
        );
        assert_eq!(
            render_tree(&view),
            "⚠ Expected a valid virtualenv path to be set\n\
             🐍 Python\n\
             \x20\x20· Version: ?\n\
             \x20\x20· Virtualenv Path: Not Found\n\
             🐍 Python Language Server\n\
             \x20\x20· Version: ?\n\
             \x20\x20· Binary Path: Not Found\n"
        );
    }

    #[test]
    fn test_render_content_nests_plugins() {
        let setup = PythonSetup {
            python_version: "3.11.4".into(),
            server_package: PythonPackage {
                name: "python-lsp-server".into(),
                kind: PackageKind::Main,
                version: Some("1.9.0".into()),
            },
            plugin_packages: vec![PythonPackage {
                name: "rope".into(),
                kind: PackageKind::Plugin,
                version: None,
            }],
        };
        let rendered = render_tree(&SidebarView::new(SidebarState::Content(setup), ResolvedSettings::default()));

        assert!(rendered.contains("\n  ▸ Plugins\n    ◆ rope\n      ⊘ Not Installed\n"));
        assert!(rendered.contains("  · Version: 3.11.4\n"));
    }
}
