//! Example and documentation catalogs.
//!
//! A catalog is a flat directory of source files sharing one extension.
//! Example catalogs fall back to a couple of built-in documents when the
//! directory is absent, so a fresh checkout still has something to show.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

/// Module specifier the playground imports renderer components from.
pub const RENDERER_MODULE: &str = "@react-pdf/renderer";

pub const QUICK_START: &str = r#"const styles = StyleSheet.create({
  page: {
    flexDirection: 'row',
    backgroundColor: '#E4E4E4'
  },
  section: {
    margin: 10,
    padding: 10,
    flexGrow: 1
  }
});

const MyDocument = () => (
  <Document>
    <Page size="A4" style={styles.page}>
      <View style={styles.section}>
        <Text>Section #1</Text>
      </View>
      <View style={styles.section}>
        <Text>Section #2</Text>
      </View>
    </Page>
  </Document>
);

export default MyDocument;"#;

const HELLO_TEXT: &str = r#"const MyDocument = () => (
  <Document>
    <Page>
      <Text>Hello World!</Text>
    </Page>
  </Document>
);

export default MyDocument;"#;

const BUILTIN_EXAMPLES: &[(&str, &str)] = &[("quick-start", QUICK_START), ("text", HELLO_TEXT)];

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid entry name: {0:?}")]
    InvalidName(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub trait ExampleCatalog: Send + Sync {
    /// What the entries are ("example", "doc"), for messages.
    fn kind(&self) -> &'static str;

    /// Entry names, sorted. Empty when the catalog is unavailable.
    fn list(&self) -> Vec<String>;

    fn get(&self, name: &str) -> Result<String, CatalogError>;
}

/// Directory-backed catalog.
#[derive(Debug, Clone)]
pub struct FsCatalog {
    dir: PathBuf,
    extension: &'static str,
    kind: &'static str,
    builtins: &'static [(&'static str, &'static str)],
}

impl FsCatalog {
    /// `.jsx` examples, with built-in fallbacks.
    pub fn examples(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "jsx",
            kind: "example",
            builtins: BUILTIN_EXAMPLES,
        }
    }

    /// `.md` reference documentation.
    pub fn docs(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "md",
            kind: "doc",
            builtins: &[],
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn builtin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builtins.iter().map(|(n, _)| n.to_string()).collect();
        names.sort();
        names
    }

    fn builtin(&self, name: &str) -> Option<String> {
        self.builtins
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, code)| code.to_string())
    }
}

impl ExampleCatalog for FsCatalog {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn list(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "catalog directory unavailable");
                return self.builtin_names();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(self.extension))
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .collect();
        names.sort();
        debug!(dir = %self.dir.display(), count = names.len(), "catalog listed");
        names
    }

    fn get(&self, name: &str) -> Result<String, CatalogError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(CatalogError::InvalidName(name.to_string()));
        }

        let path = self.dir.join(format!("{name}.{}", self.extension));
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if !self.dir.is_dir() {
                    if let Some(code) = self.builtin(name) {
                        return Ok(code);
                    }
                }
                Err(CatalogError::NotFound {
                    kind: self.kind,
                    name: name.to_string(),
                })
            }
            Err(source) => Err(CatalogError::Io { path, source }),
        }
    }
}

/// Renderer exports the playground knows how to auto-import.
const KNOWN_EXPORTS: &[&str] = &[
    "Document",
    "Page",
    "View",
    "Text",
    "Link",
    "Image",
    "Note",
    "Canvas",
    "StyleSheet",
    "Font",
    "Svg",
    "SVG",
    "Line",
    "Polyline",
    "Polygon",
    "Path",
    "Rect",
    "Circle",
    "Ellipse",
    "Tspan",
    "G",
    "Stop",
    "Defs",
    "ClipPath",
    "LinearGradient",
    "RadialGradient",
    "usePDF",
    "PDFViewer",
    "PDFDownloadLink",
    "BlobProvider",
    "pdf",
    "renderToStream",
    "renderToString",
    "renderToFile",
    "createInstance",
];

/// Always imported alongside a `<Document>`.
const DOCUMENT_BASICS: &[&str] = &["Document", "Page", "View", "Text", "StyleSheet"];

struct Patterns {
    render_call: Regex,
    commented_import: Regex,
    braces: Regex,
    arrow_component: Regex,
    document_constant: Regex,
    exports: Vec<(&'static str, Regex)>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |src: &str| Regex::new(src).expect("static pattern");
        Patterns {
            render_call: compile(r"ReactPDF\.render\([^)]*\);?"),
            commented_import: compile(r"// import.*?from.*?;?\n"),
            braces: compile(r"\{([^}]+)\}"),
            arrow_component: compile(r"const (\w+) = \(\) => \(\s*<Document"),
            document_constant: compile(r"const (\w+) = \(\s*<Document"),
            exports: KNOWN_EXPORTS
                .iter()
                .map(|name| {
                    let n = regex::escape(name);
                    let src = format!(r"<{n}[\s>]|{n}\.|\b{n}\(|const.*=.*\b{n}\b");
                    (*name, compile(&src))
                })
                .collect(),
        }
    })
}

/// Prepare a catalog example for evaluation in the playground.
///
/// Examples are written for standalone scripts, so this drops
/// `ReactPDF.render(...)` calls, turns commented-out imports (or, failing
/// that, detected component usage) into a real renderer import, imports the
/// `ReactPDF` namespace if it is still referenced, and appends a default
/// export for the main document when there is none.
pub fn normalize_example(source: &str) -> String {
    let p = patterns();
    let mut code = p.render_call.replace_all(source, "").into_owned();

    if code.contains("// import") {
        let imports = commented_imports(p, &code);
        if !imports.is_empty() {
            let body: String = code
                .split_inclusive('\n')
                .filter(|line| !(line.starts_with("//") && line.ends_with('\n')))
                .collect();
            code = format!("{}\n\n{body}", import_line(&imports));
        }
    } else {
        if !code.contains(&format!("from '{RENDERER_MODULE}'")) {
            let used = used_exports(p, &code);
            if !used.is_empty() {
                code = format!("{}\n\n{code}", import_line(&used));
            }
        }
        code = code
            .split_inclusive('\n')
            .filter(|line| {
                !(line.starts_with("//") && !line.contains("import") && line.ends_with('\n'))
            })
            .collect();
    }

    if code.contains("ReactPDF") {
        code = format!("import * as ReactPDF from '{RENDERER_MODULE}';\n{code}");
    }

    if !code.contains("export default") {
        if let Some(name) = p.arrow_component.captures(&code).map(|c| c[1].to_string()) {
            code.push_str(&format!("\nexport default {name};"));
        } else if let Some(name) = p.document_constant.captures(&code).map(|c| c[1].to_string()) {
            code.push_str(&format!("\nexport default () => {name};"));
        }
    }

    code
}

fn import_line(names: &[String]) -> String {
    format!("import {{ {} }} from '{RENDERER_MODULE}';", names.join(", "))
}

/// Names from `// import { … }` lines, deduplicated by base name. Aliases of
/// `Text` are dropped since SVG text renders fine through `Text` itself.
fn commented_imports(p: &Patterns, code: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut bases: Vec<String> = Vec::new();

    for line in p.commented_import.find_iter(code) {
        let Some(list) = p.braces.captures(line.as_str()) else {
            continue;
        };
        for item in list[1].split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let base = match item.split_once(" as ") {
                Some((base, _)) => base.trim(),
                None => item,
            };
            if item.contains(" as ") && (base == "Text" || bases.iter().any(|b| b == base)) {
                continue;
            }
            if !names.iter().any(|n| n == item) {
                names.push(item.to_string());
            }
            if !bases.iter().any(|b| b == base) {
                bases.push(base.to_string());
            }
        }
    }
    names
}

fn used_exports(p: &Patterns, code: &str) -> Vec<String> {
    let mut used: Vec<String> = p
        .exports
        .iter()
        .filter(|(_, re)| re.is_match(code))
        .map(|(name, _)| name.to_string())
        .collect();

    if code.contains("<Document") {
        for name in DOCUMENT_BASICS {
            if !used.iter().any(|u| u == name) {
                used.push(name.to_string());
            }
        }
    }
    used
}
