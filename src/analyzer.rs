use crate::fragment::{sort_by_position, Finding, FindingKind, Severity, SourceFragment};
use rustpython_parser::ast::{self, Ranged};
use rustpython_parser::Parse;
use std::collections::HashSet;

/// Names resolvable without any binding in the fragment. Covers the builtins
/// a short snippet realistically touches; unknown dotted imports are handled
/// separately via the bind pass.
const PYTHON_BUILTINS: &[&str] = &[
    "abs", "all", "any", "ascii", "bin", "bool", "bytearray", "bytes", "callable", "chr",
    "classmethod", "compile", "complex", "delattr", "dict", "dir", "divmod", "enumerate", "eval",
    "exec", "filter", "float", "format", "frozenset", "getattr", "globals", "hasattr", "hash",
    "help", "hex", "id", "input", "int", "isinstance", "issubclass", "iter", "len", "list",
    "locals", "map", "max", "memoryview", "min", "next", "object", "oct", "open", "ord", "pow",
    "print", "property", "range", "repr", "reversed", "round", "set", "setattr", "slice",
    "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException", "BlockingIOError",
    "BrokenPipeError", "BufferError", "ConnectionError", "EOFError", "Ellipsis",
    "EnvironmentError", "Exception", "FileExistsError", "FileNotFoundError", "FloatingPointError",
    "GeneratorExit", "IOError", "ImportError", "IndentationError", "IndexError",
    "InterruptedError", "IsADirectoryError", "KeyError", "KeyboardInterrupt", "LookupError",
    "MemoryError", "ModuleNotFoundError", "NameError", "NotADirectoryError", "NotImplemented",
    "NotImplementedError", "OSError", "OverflowError", "PermissionError", "RecursionError",
    "ReferenceError", "RuntimeError", "StopAsyncIteration", "StopIteration", "SyntaxError",
    "SystemError", "SystemExit", "TabError", "TimeoutError", "TypeError", "UnboundLocalError",
    "UnicodeDecodeError", "UnicodeEncodeError", "UnicodeError", "ValueError",
    "ZeroDivisionError", "__builtins__", "__debug__", "__doc__", "__file__", "__import__",
    "__name__", "__package__", "__spec__",
];

/// Builtins a fragment most commonly shadows by accident.
const SHADOW_PRONE_BUILTINS: &[&str] = &[
    "sum", "list", "dict", "set", "tuple", "str", "int", "float", "len", "max", "min", "type",
    "id", "input", "print",
];

/// Structural facts about a parsable fragment, for display alongside findings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StructureFacts {
    pub functions: usize,
    pub classes: usize,
}

/// Analyze a fragment without executing it.
///
/// Unparsable input yields exactly one `Syntax` finding carrying the parser's
/// location and message; no structural checks run in that case. Parsable input
/// gets lightweight structural checks, with findings ordered by source
/// position ascending and discovery order on ties.
pub fn analyze(fragment: &SourceFragment) -> Vec<Finding> {
    let source = fragment.text();
    let suite = match ast::Suite::parse(source, "<fragment>") {
        Ok(suite) => suite,
        Err(err) => {
            let location = offset_to_location(source, err.offset.to_usize());
            return vec![Finding::new(
                FindingKind::Syntax,
                Some(location),
                &err.error.to_string(),
                Severity::Error,
            )];
        }
    };

    let mut walker = Walker::default();
    walker.walk_stmts(&suite);

    let mut findings = Vec::new();
    unresolved_references(source, &walker, &mut findings);
    shadowed_builtins(source, &walker, &mut findings);
    unreachable_statements(source, &suite, &mut findings);
    unused_bindings(source, &suite, &walker, &mut findings);

    sort_by_position(&mut findings);
    findings
}

/// Function and class counts for a parsable fragment; zeros when the
/// fragment does not parse (the syntax finding already covers that case).
pub fn structure(fragment: &SourceFragment) -> StructureFacts {
    let suite = match ast::Suite::parse(fragment.text(), "<fragment>") {
        Ok(suite) => suite,
        Err(_) => return StructureFacts::default(),
    };
    let mut facts = StructureFacts::default();
    count_defs(&suite, &mut facts);
    facts
}

fn count_defs(stmts: &[ast::Stmt], facts: &mut StructureFacts) {
    for stmt in stmts {
        match stmt {
            ast::Stmt::FunctionDef(def) => {
                facts.functions += 1;
                count_defs(&def.body, facts);
            }
            ast::Stmt::AsyncFunctionDef(def) => {
                facts.functions += 1;
                count_defs(&def.body, facts);
            }
            ast::Stmt::ClassDef(def) => {
                facts.classes += 1;
                count_defs(&def.body, facts);
            }
            ast::Stmt::If(s) => {
                count_defs(&s.body, facts);
                count_defs(&s.orelse, facts);
            }
            ast::Stmt::For(s) => {
                count_defs(&s.body, facts);
                count_defs(&s.orelse, facts);
            }
            ast::Stmt::While(s) => {
                count_defs(&s.body, facts);
                count_defs(&s.orelse, facts);
            }
            ast::Stmt::With(s) => count_defs(&s.body, facts),
            ast::Stmt::Try(s) => {
                count_defs(&s.body, facts);
                for handler in &s.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    count_defs(&h.body, facts);
                }
                count_defs(&s.orelse, facts);
                count_defs(&s.finalbody, facts);
            }
            _ => {}
        }
    }
}

fn is_builtin(name: &str) -> bool {
    PYTHON_BUILTINS.contains(&name)
}

fn unresolved_references(source: &str, walker: &Walker, findings: &mut Vec<Finding>) {
    let mut reported: HashSet<&str> = HashSet::new();
    for (name, offset) in &walker.loads {
        if walker.bound.contains(name) || is_builtin(name) || !reported.insert(name.as_str()) {
            continue;
        }
        findings.push(Finding::new(
            FindingKind::Logical,
            Some(offset_to_location(source, *offset)),
            &format!("name '{}' is not defined anywhere in this fragment", name),
            Severity::Warning,
        ));
    }
}

fn shadowed_builtins(source: &str, walker: &Walker, findings: &mut Vec<Finding>) {
    let mut reported: HashSet<&str> = HashSet::new();
    for (name, offset) in &walker.stores {
        if !SHADOW_PRONE_BUILTINS.contains(&name.as_str()) || !reported.insert(name.as_str()) {
            continue;
        }
        findings.push(Finding::new(
            FindingKind::Lint,
            Some(offset_to_location(source, *offset)),
            &format!("binding '{}' shadows a builtin", name),
            Severity::Warning,
        ));
    }
}

/// Flags the first statement after a `return`/`raise`/`break`/`continue` in
/// each body, then recurses into nested bodies.
fn unreachable_statements(source: &str, stmts: &[ast::Stmt], findings: &mut Vec<Finding>) {
    let mut terminator: Option<&str> = None;
    for stmt in stmts {
        if let Some(kind) = terminator {
            findings.push(Finding::new(
                FindingKind::Logical,
                Some(offset_to_location(source, stmt.start().to_usize())),
                &format!("unreachable code after '{}'", kind),
                Severity::Warning,
            ));
            break;
        }
        terminator = match stmt {
            ast::Stmt::Return(_) => Some("return"),
            ast::Stmt::Raise(_) => Some("raise"),
            ast::Stmt::Break(_) => Some("break"),
            ast::Stmt::Continue(_) => Some("continue"),
            _ => None,
        };
    }

    for stmt in stmts {
        match stmt {
            ast::Stmt::FunctionDef(def) => unreachable_statements(source, &def.body, findings),
            ast::Stmt::AsyncFunctionDef(def) => {
                unreachable_statements(source, &def.body, findings)
            }
            ast::Stmt::ClassDef(def) => unreachable_statements(source, &def.body, findings),
            ast::Stmt::If(s) => {
                unreachable_statements(source, &s.body, findings);
                unreachable_statements(source, &s.orelse, findings);
            }
            ast::Stmt::For(s) => {
                unreachable_statements(source, &s.body, findings);
                unreachable_statements(source, &s.orelse, findings);
            }
            ast::Stmt::While(s) => {
                unreachable_statements(source, &s.body, findings);
                unreachable_statements(source, &s.orelse, findings);
            }
            ast::Stmt::With(s) => unreachable_statements(source, &s.body, findings),
            ast::Stmt::Try(s) => {
                unreachable_statements(source, &s.body, findings);
                for handler in &s.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    unreachable_statements(source, &h.body, findings);
                }
                unreachable_statements(source, &s.orelse, findings);
                unreachable_statements(source, &s.finalbody, findings);
            }
            _ => {}
        }
    }
}

/// Module-level simple bindings whose name is never loaded. Underscore
/// prefixes opt out, matching the usual lint convention.
fn unused_bindings(
    source: &str,
    stmts: &[ast::Stmt],
    walker: &Walker,
    findings: &mut Vec<Finding>,
) {
    for stmt in stmts {
        let ast::Stmt::Assign(assign) = stmt else {
            continue;
        };
        for target in &assign.targets {
            let ast::Expr::Name(name) = target else {
                continue;
            };
            let id = name.id.as_str();
            if id.starts_with('_') || walker.loaded.contains(id) {
                continue;
            }
            findings.push(Finding::new(
                FindingKind::Lint,
                Some(offset_to_location(source, name.start().to_usize())),
                &format!("binding '{}' is never used", id),
                Severity::Info,
            ));
        }
    }
}

/// Convert a byte offset into a 1-based (line, column) pair.
fn offset_to_location(source: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Single-pass collector: every name the fragment binds, every name it loads.
/// The bind set is module-wide and scope-blind; the checks stay conservative
/// instead of re-implementing Python scoping rules.
#[derive(Default)]
struct Walker {
    bound: HashSet<String>,
    loaded: HashSet<String>,
    loads: Vec<(String, usize)>,
    stores: Vec<(String, usize)>,
}

impl Walker {
    fn bind(&mut self, name: &str) {
        self.bound.insert(name.to_string());
    }

    fn bind_at(&mut self, name: &str, offset: usize) {
        self.stores.push((name.to_string(), offset));
        self.bind(name);
    }

    fn bind_import(&mut self, alias: &ast::Alias) {
        match &alias.asname {
            Some(asname) => self.bind(asname.as_str()),
            None => {
                // `import a.b` binds `a`
                if let Some(head) = alias.name.as_str().split('.').next() {
                    self.bind(head);
                }
            }
        }
    }

    fn bind_args(&mut self, args: &ast::Arguments) {
        for arg in args
            .posonlyargs
            .iter()
            .chain(args.args.iter())
            .chain(args.kwonlyargs.iter())
        {
            self.bind(arg.def.arg.as_str());
            if let Some(default) = &arg.default {
                self.walk_expr(default);
            }
        }
        if let Some(vararg) = &args.vararg {
            self.bind(vararg.arg.as_str());
        }
        if let Some(kwarg) = &args.kwarg {
            self.bind(kwarg.arg.as_str());
        }
    }

    fn walk_stmts(&mut self, stmts: &[ast::Stmt]) {
        for stmt in stmts {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &ast::Stmt) {
        match stmt {
            ast::Stmt::FunctionDef(def) => {
                self.bind(def.name.as_str());
                self.bind_args(&def.args);
                for dec in &def.decorator_list {
                    self.walk_expr(dec);
                }
                if let Some(returns) = &def.returns {
                    self.walk_expr(returns);
                }
                self.walk_stmts(&def.body);
            }
            ast::Stmt::AsyncFunctionDef(def) => {
                self.bind(def.name.as_str());
                self.bind_args(&def.args);
                for dec in &def.decorator_list {
                    self.walk_expr(dec);
                }
                if let Some(returns) = &def.returns {
                    self.walk_expr(returns);
                }
                self.walk_stmts(&def.body);
            }
            ast::Stmt::ClassDef(def) => {
                self.bind(def.name.as_str());
                for base in &def.bases {
                    self.walk_expr(base);
                }
                for keyword in &def.keywords {
                    self.walk_expr(&keyword.value);
                }
                for dec in &def.decorator_list {
                    self.walk_expr(dec);
                }
                self.walk_stmts(&def.body);
            }
            ast::Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    self.walk_expr(value);
                }
            }
            ast::Stmt::Delete(s) => {
                for target in &s.targets {
                    self.walk_expr(target);
                }
            }
            ast::Stmt::Assign(s) => {
                self.walk_expr(&s.value);
                for target in &s.targets {
                    self.walk_expr(target);
                }
            }
            ast::Stmt::AugAssign(s) => {
                self.walk_expr(&s.value);
                self.walk_expr(&s.target);
            }
            ast::Stmt::AnnAssign(s) => {
                self.walk_expr(&s.annotation);
                if let Some(value) = &s.value {
                    self.walk_expr(value);
                }
                self.walk_expr(&s.target);
            }
            ast::Stmt::For(s) => {
                self.walk_expr(&s.iter);
                self.walk_expr(&s.target);
                self.walk_stmts(&s.body);
                self.walk_stmts(&s.orelse);
            }
            ast::Stmt::AsyncFor(s) => {
                self.walk_expr(&s.iter);
                self.walk_expr(&s.target);
                self.walk_stmts(&s.body);
                self.walk_stmts(&s.orelse);
            }
            ast::Stmt::While(s) => {
                self.walk_expr(&s.test);
                self.walk_stmts(&s.body);
                self.walk_stmts(&s.orelse);
            }
            ast::Stmt::If(s) => {
                self.walk_expr(&s.test);
                self.walk_stmts(&s.body);
                self.walk_stmts(&s.orelse);
            }
            ast::Stmt::With(s) => {
                for item in &s.items {
                    self.walk_expr(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.walk_expr(vars);
                    }
                }
                self.walk_stmts(&s.body);
            }
            ast::Stmt::AsyncWith(s) => {
                for item in &s.items {
                    self.walk_expr(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.walk_expr(vars);
                    }
                }
                self.walk_stmts(&s.body);
            }
            ast::Stmt::Raise(s) => {
                if let Some(exc) = &s.exc {
                    self.walk_expr(exc);
                }
                if let Some(cause) = &s.cause {
                    self.walk_expr(cause);
                }
            }
            ast::Stmt::Try(s) => {
                self.walk_stmts(&s.body);
                for handler in &s.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    if let Some(type_) = &h.type_ {
                        self.walk_expr(type_);
                    }
                    if let Some(name) = &h.name {
                        self.bind(name.as_str());
                    }
                    self.walk_stmts(&h.body);
                }
                self.walk_stmts(&s.orelse);
                self.walk_stmts(&s.finalbody);
            }
            ast::Stmt::Assert(s) => {
                self.walk_expr(&s.test);
                if let Some(msg) = &s.msg {
                    self.walk_expr(msg);
                }
            }
            ast::Stmt::Import(s) => {
                for alias in &s.names {
                    self.bind_import(alias);
                }
            }
            ast::Stmt::ImportFrom(s) => {
                for alias in &s.names {
                    self.bind_import(alias);
                }
            }
            ast::Stmt::Global(s) => {
                for name in &s.names {
                    self.bind(name.as_str());
                }
            }
            ast::Stmt::Nonlocal(s) => {
                for name in &s.names {
                    self.bind(name.as_str());
                }
            }
            ast::Stmt::Expr(s) => self.walk_expr(&s.value),
            _ => {}
        }
    }

    fn walk_expr(&mut self, expr: &ast::Expr) {
        match expr {
            ast::Expr::Name(name) => {
                if matches!(name.ctx, ast::ExprContext::Load) {
                    self.loaded.insert(name.id.to_string());
                    self.loads
                        .push((name.id.to_string(), name.start().to_usize()));
                } else {
                    self.bind_at(name.id.as_str(), name.start().to_usize());
                }
            }
            ast::Expr::BoolOp(e) => {
                for value in &e.values {
                    self.walk_expr(value);
                }
            }
            ast::Expr::NamedExpr(e) => {
                self.walk_expr(&e.value);
                self.walk_expr(&e.target);
            }
            ast::Expr::BinOp(e) => {
                self.walk_expr(&e.left);
                self.walk_expr(&e.right);
            }
            ast::Expr::UnaryOp(e) => self.walk_expr(&e.operand),
            ast::Expr::Lambda(e) => {
                self.bind_args(&e.args);
                self.walk_expr(&e.body);
            }
            ast::Expr::IfExp(e) => {
                self.walk_expr(&e.test);
                self.walk_expr(&e.body);
                self.walk_expr(&e.orelse);
            }
            ast::Expr::Dict(e) => {
                for key in e.keys.iter().flatten() {
                    self.walk_expr(key);
                }
                for value in &e.values {
                    self.walk_expr(value);
                }
            }
            ast::Expr::Set(e) => {
                for elt in &e.elts {
                    self.walk_expr(elt);
                }
            }
            ast::Expr::ListComp(e) => {
                self.walk_generators(&e.generators);
                self.walk_expr(&e.elt);
            }
            ast::Expr::SetComp(e) => {
                self.walk_generators(&e.generators);
                self.walk_expr(&e.elt);
            }
            ast::Expr::DictComp(e) => {
                self.walk_generators(&e.generators);
                self.walk_expr(&e.key);
                self.walk_expr(&e.value);
            }
            ast::Expr::GeneratorExp(e) => {
                self.walk_generators(&e.generators);
                self.walk_expr(&e.elt);
            }
            ast::Expr::Await(e) => self.walk_expr(&e.value),
            ast::Expr::Yield(e) => {
                if let Some(value) = &e.value {
                    self.walk_expr(value);
                }
            }
            ast::Expr::YieldFrom(e) => self.walk_expr(&e.value),
            ast::Expr::Compare(e) => {
                self.walk_expr(&e.left);
                for comparator in &e.comparators {
                    self.walk_expr(comparator);
                }
            }
            ast::Expr::Call(e) => {
                self.walk_expr(&e.func);
                for arg in &e.args {
                    self.walk_expr(arg);
                }
                for keyword in &e.keywords {
                    self.walk_expr(&keyword.value);
                }
            }
            ast::Expr::FormattedValue(e) => {
                self.walk_expr(&e.value);
                if let Some(spec) = &e.format_spec {
                    self.walk_expr(spec);
                }
            }
            ast::Expr::JoinedStr(e) => {
                for value in &e.values {
                    self.walk_expr(value);
                }
            }
            ast::Expr::Attribute(e) => self.walk_expr(&e.value),
            ast::Expr::Subscript(e) => {
                self.walk_expr(&e.value);
                self.walk_expr(&e.slice);
            }
            ast::Expr::Starred(e) => self.walk_expr(&e.value),
            ast::Expr::List(e) => {
                for elt in &e.elts {
                    self.walk_expr(elt);
                }
            }
            ast::Expr::Tuple(e) => {
                for elt in &e.elts {
                    self.walk_expr(elt);
                }
            }
            ast::Expr::Slice(e) => {
                if let Some(lower) = &e.lower {
                    self.walk_expr(lower);
                }
                if let Some(upper) = &e.upper {
                    self.walk_expr(upper);
                }
                if let Some(step) = &e.step {
                    self.walk_expr(step);
                }
            }
            _ => {}
        }
    }

    fn walk_generators(&mut self, generators: &[ast::Comprehension]) {
        for gen in generators {
            self.walk_expr(&gen.iter);
            self.walk_expr(&gen.target);
            for cond in &gen.ifs {
                self.walk_expr(cond);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze_text(source: &str) -> Vec<Finding> {
        analyze(&SourceFragment::new(source))
    }

    #[test]
    fn test_syntax_error_yields_exactly_one_finding() {
        let findings = analyze_text("def broken(:\n    pass\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Syntax);
        assert_eq!(findings[0].severity, Severity::Error);
        assert!(findings[0].location.is_some());
    }

    #[test]
    fn test_syntax_error_location_points_at_offending_line() {
        let findings = analyze_text("x = 1\ny = (\n");
        assert_eq!(findings.len(), 1);
        let (line, _) = findings[0].location.unwrap();
        assert!(line >= 2, "expected error on line 2+, got line {}", line);
    }

    #[test]
    fn test_valid_print_statement_has_no_findings() {
        assert!(analyze_text("print(1/0)").is_empty());
        assert!(analyze_text("print(1)").is_empty());
    }

    #[test]
    fn test_unresolved_name_reported_once() {
        let findings = analyze_text("print(total)\nprint(total)\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Logical);
        assert!(findings[0].message.contains("total"));
        assert_eq!(findings[0].location.unwrap().0, 1);
    }

    #[test]
    fn test_bound_names_are_resolved() {
        let findings = analyze_text("total = 3\nprint(total)\n");
        assert!(findings.is_empty());
    }

    #[test]
    fn test_function_params_are_resolved() {
        let source = "def add(a, b):\n    return a + b\n\nprint(add(1, 2))\n";
        assert!(analyze_text(source).is_empty());
    }

    #[test]
    fn test_import_binds_head_segment() {
        let source = "import os.path\nprint(os.getcwd())\n";
        assert!(analyze_text(source).is_empty());
    }

    #[test]
    fn test_import_alias_binds_asname() {
        let source = "import json as j\nprint(j.dumps({}))\n";
        assert!(analyze_text(source).is_empty());
    }

    #[test]
    fn test_for_target_and_comprehension_target_bind() {
        let source = "for i in range(3):\n    print(i)\nsquares = [n * n for n in range(4)]\nprint(squares)\n";
        assert!(analyze_text(source).is_empty());
    }

    #[test]
    fn test_unreachable_after_return() {
        let source = "def f():\n    return 1\n    print('never')\n";
        let findings = analyze_text(source);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Logical);
        assert!(findings[0].message.contains("unreachable"));
        assert_eq!(findings[0].location.unwrap().0, 3);
    }

    #[test]
    fn test_unreachable_after_break_in_loop() {
        let source = "while True:\n    break\n    print('never')\n";
        let findings = analyze_text(source);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("break"));
    }

    #[test]
    fn test_unused_module_binding() {
        let findings = analyze_text("unused_total = 42\nprint('hi')\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Lint);
        assert_eq!(findings[0].severity, Severity::Info);
        assert!(findings[0].message.contains("unused_total"));
    }

    #[test]
    fn test_underscore_binding_not_reported_unused() {
        assert!(analyze_text("_ignored = 42\nprint('hi')\n").is_empty());
    }

    #[test]
    fn test_builtin_shadowing_reported() {
        let findings = analyze_text("list = [1, 2]\nprint(list)\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Lint);
        assert!(findings[0].message.contains("shadows a builtin"));
    }

    #[test]
    fn test_findings_ordered_by_source_position() {
        let source = "print(alpha)\nzed = 1\nprint(beta)\n";
        let findings = analyze_text(source);
        // alpha (line 1), unused zed (line 2), beta (line 3)
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].location.unwrap().0, 1);
        assert_eq!(findings[1].location.unwrap().0, 2);
        assert_eq!(findings[2].location.unwrap().0, 3);
    }

    #[test]
    fn test_structure_counts_defs_and_classes() {
        let source =
            "class A:\n    def method(self):\n        pass\n\ndef top():\n    pass\n";
        let facts = structure(&SourceFragment::new(source));
        assert_eq!(facts.functions, 2);
        assert_eq!(facts.classes, 1);
    }

    #[test]
    fn test_structure_zero_on_syntax_error() {
        let facts = structure(&SourceFragment::new("def broken(:"));
        assert_eq!(facts, StructureFacts::default());
    }

    #[test]
    fn test_offset_to_location() {
        let source = "ab\ncd\nef";
        assert_eq!(offset_to_location(source, 0), (1, 1));
        assert_eq!(offset_to_location(source, 3), (2, 1));
        assert_eq!(offset_to_location(source, 4), (2, 2));
        assert_eq!(offset_to_location(source, 7), (3, 2));
    }

    #[test]
    fn test_except_handler_name_binds() {
        let source = "try:\n    print(1)\nexcept ValueError as exc:\n    print(exc)\n";
        assert!(analyze_text(source).is_empty());
    }

    #[test]
    fn test_lambda_params_bind() {
        let source = "double = lambda value: value * 2\nprint(double(2))\n";
        assert!(analyze_text(source).is_empty());
    }
}
