//! Kernels the host device can execute, and the "compiler" that binds kernel declarations of an
//! OpenCL C source to them.
//!
//! The host doesn't compile the kernel bodies. Each `__kernel` declaration of the source is
//! matched by name and signature against a builtin implementation. Declarations without a
//! matching builtin fail the build with a log, the same way a real compiler would.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use rayon::prelude::*;

use super::queue::Failure;
use super::{INVALID_KERNEL_ARGS, OUT_OF_RESOURCES};

/// Type of a kernel parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ParamKind {
    /// A pointer to device memory.
    Memory,
    F32,
    U32,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Memory => "pointer",
            Self::F32 => "float",
            Self::U32 => "uint",
        };
        write!(f, "{}", name)
    }
}

/// An argument that is sent to a queue worker, hence it owns its data.
#[derive(Clone, Debug)]
pub(crate) enum HostArg {
    Memory(Arc<RwLock<Vec<u8>>>),
    F32(f32),
    U32(u32),
}

impl HostArg {
    fn kind(&self) -> ParamKind {
        match self {
            Self::Memory(_) => ParamKind::Memory,
            Self::F32(_) => ParamKind::F32,
            Self::U32(_) => ParamKind::U32,
        }
    }
}

type KernelFn = fn(usize, &[HostArg]) -> Result<(), Failure>;

/// A builtin kernel.
#[derive(Clone, Copy)]
pub(crate) struct HostKernel {
    name: &'static str,
    params: &'static [ParamKind],
    body: KernelFn,
}

impl fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKernel")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

impl HostKernel {
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Checks that the arguments match the kernel signature.
    pub(crate) fn check_args(&self, args: &[HostArg]) -> Result<(), Failure> {
        let kinds = args.iter().map(HostArg::kind).collect::<Vec<_>>();
        if kinds != self.params {
            return Err((
                INVALID_KERNEL_ARGS,
                format!(
                    "Kernel {} expects ({}), got ({}).",
                    self.name,
                    join(self.params),
                    join(&kinds)
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn launch(&self, global_size: usize, args: &[HostArg]) -> Result<(), Failure> {
        self.check_args(args)?;
        (self.body)(global_size, args)
    }
}

fn join(kinds: &[ParamKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

const BUILTINS: &[HostKernel] = &[HostKernel {
    name: "saxpy",
    params: &[
        ParamKind::U32,
        ParamKind::F32,
        ParamKind::Memory,
        ParamKind::Memory,
    ],
    body: saxpy,
}];

const F32_SIZE: usize = std::mem::size_of::<f32>();

/// `y[i] = a * x[i] + y[i]` for every work-item `i < n`.
fn saxpy(global_size: usize, args: &[HostArg]) -> Result<(), Failure> {
    let (n, a, x, y) = match args {
        [HostArg::U32(n), HostArg::F32(a), HostArg::Memory(x), HostArg::Memory(y)] => {
            (*n as usize, *a, x, y)
        }
        _ => {
            return Err((
                INVALID_KERNEL_ARGS,
                "saxpy expects (uint, float, pointer, pointer).".to_string(),
            ))
        }
    };
    let items = n.min(global_size);
    let bytes = items * F32_SIZE;

    // `x` and `y` may be the same allocation, it must not be locked twice then.
    let aliased = Arc::ptr_eq(x, y);
    let mut y = y.write().unwrap_or_else(PoisonError::into_inner);
    let x_snapshot;
    let x_guard;
    let x: &[u8] = if aliased {
        x_snapshot = y.clone();
        &x_snapshot
    } else {
        x_guard = x.read().unwrap_or_else(PoisonError::into_inner);
        &x_guard
    };

    if x.len() < bytes || y.len() < bytes {
        return Err((
            OUT_OF_RESOURCES,
            format!(
                "saxpy over {} items needs {} bytes per buffer, got {} and {}.",
                items,
                bytes,
                x.len(),
                y.len()
            ),
        ));
    }

    y[..bytes]
        .par_chunks_mut(F32_SIZE)
        .zip(x[..bytes].par_chunks(F32_SIZE))
        .for_each(|(y, x)| {
            let xi = f32::from_ne_bytes([x[0], x[1], x[2], x[3]]);
            let yi = f32::from_ne_bytes([y[0], y[1], y[2], y[3]]);
            y.copy_from_slice(&(a * xi + yi).to_ne_bytes());
        });
    Ok(())
}

/// A `__kernel` declaration found in the source.
#[derive(Debug, PartialEq)]
struct Declaration {
    name: String,
    params: Vec<ParamKind>,
    line: usize,
}

/// Binds every kernel declared in `source` to a builtin.
///
/// On failure the build log is returned, it is never empty.
pub(crate) fn compile(source: &str) -> Result<Vec<HostKernel>, String> {
    let mut log = Vec::new();
    let declarations = parse_declarations(source, &mut log);
    if declarations.is_empty() && log.is_empty() {
        log.push("error: the program doesn't declare any kernel".to_string());
    }

    let mut kernels = Vec::new();
    for declaration in declarations {
        match BUILTINS.iter().find(|k| k.name == declaration.name) {
            None => log.push(format!(
                "{}: error: no host implementation for kernel `{}`",
                declaration.line, declaration.name
            )),
            Some(builtin) if builtin.params != declaration.params.as_slice() => log.push(format!(
                "{}: error: kernel `{}` is declared as ({}), the host implementation takes ({})",
                declaration.line,
                declaration.name,
                join(&declaration.params),
                join(builtin.params)
            )),
            Some(builtin) => kernels.push(*builtin),
        }
    }

    if log.is_empty() {
        Ok(kernels)
    } else {
        Err(log.join("\n"))
    }
}

fn parse_declarations(source: &str, log: &mut Vec<String>) -> Vec<Declaration> {
    let source = strip_comments(source);
    let mut declarations = Vec::new();
    for (position, _) in source.match_indices("__kernel") {
        let line = source[..position].matches('\n').count() + 1;
        let rest = source[position + "__kernel".len()..].trim_start();
        let rest = match rest.strip_prefix("void") {
            Some(rest) => rest,
            None => {
                log.push(format!("{}: error: kernels must return void", line));
                continue;
            }
        };
        let (open, close) = match (rest.find('('), rest.find(')')) {
            (Some(open), Some(close)) if open < close => (open, close),
            _ => {
                log.push(format!("{}: error: expected a parameter list", line));
                continue;
            }
        };
        let name = rest[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            log.push(format!("{}: error: invalid kernel name `{}`", line, name));
            continue;
        }

        let mut params = Vec::new();
        for param in rest[open + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            match parse_param(param) {
                Some(kind) => params.push(kind),
                None => log.push(format!(
                    "{}: error: unsupported parameter `{}` of kernel `{}`",
                    line, param, name
                )),
            }
        }
        declarations.push(Declaration {
            name: name.to_string(),
            params,
            line,
        });
    }
    declarations
}

fn parse_param(param: &str) -> Option<ParamKind> {
    if param.contains('*') {
        return Some(ParamKind::Memory);
    }
    const QUALIFIERS: &[&str] = &["const", "__private", "private", "restrict", "volatile"];
    let ty = param
        .split_whitespace()
        .find(|token| !QUALIFIERS.contains(token))?;
    match ty {
        "float" => Some(ParamKind::F32),
        "uint" | "unsigned" => Some(ParamKind::U32),
        _ => None,
    }
}

/// Replaces comments with whitespace, line breaks are kept so that line numbers stay correct.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = ' ';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && c == '/' {
                        break;
                    }
                    previous = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, RwLock};

    use super::{compile, parse_param, strip_comments, HostArg, ParamKind};

    const SAXPY: &str = r#"
        // y = a*x + y
        __kernel void saxpy(const uint n, const float a,
                            __global const float* x, __global float* y)
        {
            const size_t i = get_global_id(0);
            if (i < n) y[i] = a * x[i] + y[i];
        }
    "#;

    fn memory(values: &[f32]) -> Arc<RwLock<Vec<u8>>> {
        let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Arc::new(RwLock::new(bytes))
    }

    fn floats(memory: &Arc<RwLock<Vec<u8>>>) -> Vec<f32> {
        memory
            .read()
            .unwrap()
            .chunks(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_compile_saxpy() {
        let kernels = compile(SAXPY).unwrap();
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].name(), "saxpy");
    }

    #[test]
    fn test_compile_unknown_kernel() {
        let log = compile("__kernel void gemm(__global float* a) {}").unwrap_err();
        assert!(log.contains("no host implementation for kernel `gemm`"));
        assert!(log.starts_with("1:"));
    }

    #[test]
    fn test_compile_signature_mismatch() {
        let log = compile("\n\n__kernel void saxpy(float a, __global float* x) {}").unwrap_err();
        assert!(log.starts_with("3: error: kernel `saxpy` is declared as (float, pointer)"));
    }

    #[test]
    fn test_compile_empty_program() {
        let log = compile("/* __kernel void saxpy() */ int helper() { return 0; }").unwrap_err();
        assert_eq!(log, "error: the program doesn't declare any kernel");
    }

    #[test]
    fn test_compile_non_void_kernel() {
        let log = compile("__kernel int saxpy() {}").unwrap_err();
        assert!(log.contains("kernels must return void"));
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("const float a"), Some(ParamKind::F32));
        assert_eq!(parse_param("uint n"), Some(ParamKind::U32));
        assert_eq!(parse_param("int offset"), None);
        assert_eq!(
            parse_param("__global const float* restrict x"),
            Some(ParamKind::Memory)
        );
        assert_eq!(parse_param("double d"), None);
    }

    #[test]
    fn test_strip_comments_keeps_lines() {
        let stripped = strip_comments("a // one\nb /* two\nthree */ c");
        assert_eq!(stripped.matches('\n').count(), 2);
        assert!(!stripped.contains("one"));
        assert!(!stripped.contains("three"));
        assert!(stripped.contains('c'));
    }

    #[test]
    fn test_saxpy() {
        let kernel = compile(SAXPY).unwrap()[0];
        let x = memory(&[1.0, 2.0, 3.0, 4.0]);
        let y = memory(&[10.0, 20.0, 30.0, 40.0]);
        let args = [
            HostArg::U32(3),
            HostArg::F32(2.0),
            HostArg::Memory(x),
            HostArg::Memory(y.clone()),
        ];
        kernel.launch(4, &args).unwrap();
        // The last element is beyond `n` and stays untouched.
        assert_eq!(floats(&y), vec![12.0, 24.0, 36.0, 40.0]);
    }

    #[test]
    fn test_saxpy_aliased_buffers() {
        let kernel = compile(SAXPY).unwrap()[0];
        let xy = memory(&[1.0, 2.0]);
        let args = [
            HostArg::U32(2),
            HostArg::F32(3.0),
            HostArg::Memory(xy.clone()),
            HostArg::Memory(xy.clone()),
        ];
        kernel.launch(2, &args).unwrap();
        assert_eq!(floats(&xy), vec![4.0, 8.0]);
    }

    #[test]
    fn test_saxpy_wrong_args() {
        let kernel = compile(SAXPY).unwrap()[0];
        let (code, message) = kernel
            .launch(1, &[HostArg::F32(1.0), HostArg::U32(1)])
            .unwrap_err();
        assert_eq!(code, super::INVALID_KERNEL_ARGS);
        assert!(message.contains("expects (uint, float, pointer, pointer)"));
    }

    #[test]
    fn test_saxpy_buffer_too_small() {
        let kernel = compile(SAXPY).unwrap()[0];
        let args = [
            HostArg::U32(8),
            HostArg::F32(1.0),
            HostArg::Memory(memory(&[1.0])),
            HostArg::Memory(memory(&[1.0])),
        ];
        let (code, _) = kernel.launch(8, &args).unwrap_err();
        assert_eq!(code, super::OUT_OF_RESOURCES);
    }
}
