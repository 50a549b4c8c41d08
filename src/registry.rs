//! Operation registry: the single source of truth for routing.
//!
//! A static table enumerates every supported `(category, operation)` with
//! its upstream, the upstream's actual tool identifier, a description, and
//! whether results may be cached. Categories partition the table; each
//! upstream owns exactly one category, plus the synthetic batch category
//! that maps to the batch executor. The table never changes at runtime.

use serde::{Deserialize, Serialize};

/// Upstream server identifiers. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamName {
    Serena,
    Context7,
    Playwright,
    Tavily,
    Shadcn,
}

impl UpstreamName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Serena => "serena",
            Self::Context7 => "context7",
            Self::Playwright => "playwright",
            Self::Tavily => "tavily",
            Self::Shadcn => "shadcn",
        }
    }

    /// All upstreams, in launch order.
    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::Serena,
            Self::Context7,
            Self::Playwright,
            Self::Tavily,
            Self::Shadcn,
        ]
    }

    /// The meta-tool category this upstream serves.
    #[must_use]
    pub const fn category(self) -> Category {
        match self {
            Self::Serena => Category::CodeOperations,
            Self::Context7 => Category::DocumentationLookup,
            Self::Playwright => Category::BrowserTesting,
            Self::Tavily => Category::WebResearch,
            Self::Shadcn => Category::UiComponents,
        }
    }
}

impl std::fmt::Display for UpstreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meta-tool categories. Closed set; `Batch` is synthetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    CodeOperations,
    DocumentationLookup,
    BrowserTesting,
    WebResearch,
    UiComponents,
    Batch,
}

impl Category {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CodeOperations => "code_operations",
            Self::DocumentationLookup => "documentation_lookup",
            Self::BrowserTesting => "browser_testing",
            Self::WebResearch => "web_research",
            Self::UiComponents => "ui_components",
            Self::Batch => "batch",
        }
    }

    /// Name of the meta-tool advertising this category.
    #[must_use]
    pub const fn tool_name(self) -> &'static str {
        match self {
            Self::Batch => "batch_operations",
            other => other.as_str(),
        }
    }

    /// Parse a category string as it appears inside batch operations.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code_operations" => Some(Self::CodeOperations),
            "documentation_lookup" => Some(Self::DocumentationLookup),
            "browser_testing" => Some(Self::BrowserTesting),
            "web_research" => Some(Self::WebResearch),
            "ui_components" => Some(Self::UiComponents),
            "batch" => Some(Self::Batch),
            _ => None,
        }
    }

    /// Parse a meta-tool name (`batch_operations` maps to `Batch`).
    #[must_use]
    pub fn from_tool_name(s: &str) -> Option<Self> {
        match s {
            "batch_operations" => Some(Self::Batch),
            other => Self::parse(other).filter(|c| *c != Self::Batch),
        }
    }

    /// All categories backed by an upstream (everything but `Batch`).
    #[must_use]
    pub const fn routed() -> [Self; 5] {
        [
            Self::CodeOperations,
            Self::DocumentationLookup,
            Self::BrowserTesting,
            Self::WebResearch,
            Self::UiComponents,
        ]
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routing entry.
#[derive(Clone, Copy, Debug)]
pub struct OperationMapping {
    pub category: Category,
    pub op: &'static str,
    pub upstream: UpstreamName,
    pub tool: &'static str,
    pub cacheable: bool,
    pub description: &'static str,
}

/// The full routing table.
///
/// Several `code_operations` entries intentionally share the same upstream
/// tool (`renameFile`, `moveFile`, `editFile` all route to `replace_lines`);
/// whether the tool supports each is the upstream's concern.
const TABLE: &[OperationMapping] = &[
    // code_operations → serena
    op(Category::CodeOperations, "findSymbol", UpstreamName::Serena, "find_symbol", true,
        "Locate a symbol definition by name path"),
    op(Category::CodeOperations, "findReferences", UpstreamName::Serena, "find_referencing_symbols", true,
        "Find references to a symbol"),
    op(Category::CodeOperations, "getSymbolsOverview", UpstreamName::Serena, "get_symbols_overview", true,
        "Summarize the symbols in a file"),
    op(Category::CodeOperations, "searchPattern", UpstreamName::Serena, "search_for_pattern", true,
        "Search the project for a regex pattern"),
    op(Category::CodeOperations, "readFile", UpstreamName::Serena, "read_file", true,
        "Read a file from the project"),
    op(Category::CodeOperations, "listDir", UpstreamName::Serena, "list_dir", true,
        "List a directory"),
    op(Category::CodeOperations, "findFile", UpstreamName::Serena, "find_file", true,
        "Find files by name mask"),
    op(Category::CodeOperations, "createFile", UpstreamName::Serena, "create_text_file", false,
        "Create or overwrite a file"),
    op(Category::CodeOperations, "replaceSymbolBody", UpstreamName::Serena, "replace_symbol_body", false,
        "Replace a symbol's body"),
    op(Category::CodeOperations, "insertAfterSymbol", UpstreamName::Serena, "insert_after_symbol", false,
        "Insert code after a symbol"),
    op(Category::CodeOperations, "insertBeforeSymbol", UpstreamName::Serena, "insert_before_symbol", false,
        "Insert code before a symbol"),
    op(Category::CodeOperations, "replaceLines", UpstreamName::Serena, "replace_lines", false,
        "Replace a line range in a file"),
    op(Category::CodeOperations, "renameFile", UpstreamName::Serena, "replace_lines", false,
        "Rename a file"),
    op(Category::CodeOperations, "moveFile", UpstreamName::Serena, "replace_lines", false,
        "Move a file"),
    op(Category::CodeOperations, "editFile", UpstreamName::Serena, "replace_lines", false,
        "Edit a file in place"),
    op(Category::CodeOperations, "deleteLines", UpstreamName::Serena, "delete_lines", false,
        "Delete a line range from a file"),
    op(Category::CodeOperations, "executeShell", UpstreamName::Serena, "execute_shell_command", false,
        "Run a shell command in the project"),
    // documentation_lookup → context7
    op(Category::DocumentationLookup, "resolveLibrary", UpstreamName::Context7, "resolve-library-id", true,
        "Resolve a package name to a library id"),
    op(Category::DocumentationLookup, "getDocs", UpstreamName::Context7, "get-library-docs", true,
        "Fetch documentation for a library id"),
    // browser_testing → playwright
    op(Category::BrowserTesting, "navigate", UpstreamName::Playwright, "browser_navigate", false,
        "Navigate the browser to a URL"),
    op(Category::BrowserTesting, "snapshot", UpstreamName::Playwright, "browser_snapshot", false,
        "Capture an accessibility snapshot"),
    op(Category::BrowserTesting, "click", UpstreamName::Playwright, "browser_click", false,
        "Click an element"),
    op(Category::BrowserTesting, "type", UpstreamName::Playwright, "browser_type", false,
        "Type text into an element"),
    op(Category::BrowserTesting, "pressKey", UpstreamName::Playwright, "browser_press_key", false,
        "Press a keyboard key"),
    op(Category::BrowserTesting, "screenshot", UpstreamName::Playwright, "browser_take_screenshot", false,
        "Take a screenshot"),
    op(Category::BrowserTesting, "evaluate", UpstreamName::Playwright, "browser_evaluate", false,
        "Evaluate JavaScript on the page"),
    op(Category::BrowserTesting, "waitFor", UpstreamName::Playwright, "browser_wait_for", false,
        "Wait for text or time"),
    op(Category::BrowserTesting, "consoleMessages", UpstreamName::Playwright, "browser_console_messages", false,
        "Read console messages"),
    op(Category::BrowserTesting, "networkRequests", UpstreamName::Playwright, "browser_network_requests", false,
        "List network requests"),
    op(Category::BrowserTesting, "closeBrowser", UpstreamName::Playwright, "browser_close", false,
        "Close the browser"),
    // web_research → tavily
    op(Category::WebResearch, "search", UpstreamName::Tavily, "tavily-search", true,
        "Web search"),
    op(Category::WebResearch, "extract", UpstreamName::Tavily, "tavily-extract", true,
        "Extract page content from URLs"),
    op(Category::WebResearch, "crawl", UpstreamName::Tavily, "tavily-crawl", true,
        "Crawl a site from a root URL"),
    op(Category::WebResearch, "mapSite", UpstreamName::Tavily, "tavily-map", true,
        "Map a site's URL structure"),
    // ui_components → shadcn
    op(Category::UiComponents, "listComponents", UpstreamName::Shadcn, "list_components", true,
        "List available UI components"),
    op(Category::UiComponents, "getComponent", UpstreamName::Shadcn, "get_component", true,
        "Fetch a component's source"),
    op(Category::UiComponents, "getComponentDemo", UpstreamName::Shadcn, "get_component_demo", true,
        "Fetch a component's demo"),
    op(Category::UiComponents, "listBlocks", UpstreamName::Shadcn, "list_blocks", true,
        "List available UI blocks"),
    op(Category::UiComponents, "getBlock", UpstreamName::Shadcn, "get_block", true,
        "Fetch a block's source"),
];

const fn op(
    category: Category,
    op: &'static str,
    upstream: UpstreamName,
    tool: &'static str,
    cacheable: bool,
    description: &'static str,
) -> OperationMapping {
    OperationMapping {
        category,
        op,
        upstream,
        tool,
        cacheable,
        description,
    }
}

/// Immutable lookup surface over the routing table.
#[derive(Clone, Copy, Debug, Default)]
pub struct OperationRegistry;

impl OperationRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Resolve an operation to its routing entry.
    #[must_use]
    pub fn resolve(&self, category: Category, op_name: &str) -> Option<&'static OperationMapping> {
        TABLE
            .iter()
            .find(|m| m.category == category && m.op == op_name)
    }

    /// Operation names for one category, in table order. Used by the
    /// meta-tool schemas so the agent sees valid enum values.
    #[must_use]
    pub fn list_operations(&self, category: Category) -> Vec<&'static str> {
        TABLE
            .iter()
            .filter(|m| m.category == category)
            .map(|m| m.op)
            .collect()
    }

    /// Cacheable operation names for one upstream. Used by cache
    /// invalidation.
    #[must_use]
    pub fn cacheable_for(&self, upstream: UpstreamName) -> Vec<&'static str> {
        TABLE
            .iter()
            .filter(|m| m.upstream == upstream && m.cacheable)
            .map(|m| m.op)
            .collect()
    }

    /// Every entry, in table order.
    #[must_use]
    pub fn entries(&self) -> &'static [OperationMapping] {
        TABLE
    }

    #[must_use]
    pub fn len(&self) -> usize {
        TABLE.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        TABLE.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_operation() {
        let registry = OperationRegistry::new();
        let mapping = registry
            .resolve(Category::CodeOperations, "findSymbol")
            .expect("mapping");
        assert_eq!(mapping.upstream, UpstreamName::Serena);
        assert_eq!(mapping.tool, "find_symbol");
        assert!(mapping.cacheable);
    }

    #[test]
    fn test_resolve_unknown_operation() {
        let registry = OperationRegistry::new();
        assert!(registry.resolve(Category::CodeOperations, "nope").is_none());
        // Operation names do not leak across categories.
        assert!(registry.resolve(Category::WebResearch, "findSymbol").is_none());
    }

    #[test]
    fn test_batch_category_has_no_entries() {
        let registry = OperationRegistry::new();
        assert!(registry.list_operations(Category::Batch).is_empty());
    }

    #[test]
    fn test_each_upstream_owns_one_category() {
        for mapping in OperationRegistry::new().entries() {
            assert_eq!(mapping.category, mapping.upstream.category());
        }
    }

    #[test]
    fn test_ambiguous_entries_route_as_written() {
        let registry = OperationRegistry::new();
        for op_name in ["renameFile", "moveFile", "editFile"] {
            let mapping = registry
                .resolve(Category::CodeOperations, op_name)
                .expect("mapping");
            assert_eq!(mapping.tool, "replace_lines");
            assert!(!mapping.cacheable);
        }
    }

    #[test]
    fn test_cacheable_for_excludes_writes() {
        let registry = OperationRegistry::new();
        let cacheable = registry.cacheable_for(UpstreamName::Serena);
        assert!(cacheable.contains(&"findSymbol"));
        assert!(!cacheable.contains(&"createFile"));
        assert!(!cacheable.contains(&"executeShell"));
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in Category::routed() {
            assert_eq!(Category::parse(category.as_str()), Some(category));
            assert_eq!(Category::from_tool_name(category.tool_name()), Some(category));
        }
        assert_eq!(Category::parse("batch"), Some(Category::Batch));
        assert_eq!(Category::from_tool_name("batch_operations"), Some(Category::Batch));
        // The batch category is not addressable as a plain tool name.
        assert_eq!(Category::from_tool_name("batch"), None);
        assert_eq!(Category::from_tool_name("nope"), None);
    }

    #[test]
    fn test_operations_are_unique_within_category() {
        let registry = OperationRegistry::new();
        for category in Category::routed() {
            let mut ops = registry.list_operations(category);
            let before = ops.len();
            ops.sort_unstable();
            ops.dedup();
            assert_eq!(ops.len(), before, "duplicate op in {category}");
        }
    }
}
