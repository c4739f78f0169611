use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sable::compiler::{compile, CompilationOptions, SourceFile};
use sable::lexer::Lexer;
use sable::parser::Parser;
use sable::vm::{run_module, VmOptions};

const FIBONACCI: &str = r#"
    using System;
    class Program {
        static int Fib(int n) {
            if (n <= 1) {
                return n;
            }
            return Fib(n - 1) + Fib(n - 2);
        }
        static void Main() {
            Console.WriteLine(Fib(20));
        }
    }
"#;

const PATTERNS: &str = r#"
    using System;
    record Point(int X, int Y);
    class Program {
        static int Score(object o) {
            switch (o) {
                case Point(0, 0): return 0;
                case Point(var x, 0): return x;
                case Point { Y is var y } when y > 10: return y * 2;
                case int i: return i;
                default: return -1;
            }
        }
        static void Main() {
            int total = 0;
            for (int i = 0; i < 2000; i++) {
                total += Score(new Point(i % 5, i % 13));
                total += Score(i);
            }
            Console.WriteLine(total);
        }
    }
"#;

/// `count` independent classes, each with a few methods, so the worker
/// pool has something to spread.
fn many_types(count: usize) -> String {
    let mut source = String::from("using System;\n");
    for i in 0..count {
        source.push_str(&format!(
            r#"
            class Type{i} {{
                int value;
                public Type{i}(int value) {{ this.value = value; }}
                public int Twice() => value * 2;
                public string Describe(object o) {{
                    if (o is int n && n > {i}) {{
                        return "big " + n;
                    }}
                    return o is string s ? s : "other";
                }}
                public static int Sum(int n) {{
                    int total = 0;
                    for (int j = 0; j < n; j++) {{ total += j; }}
                    return total;
                }}
            }}
            "#
        ));
    }
    source.push_str("class Program { static void Main() { Console.WriteLine(Type0.Sum(10)); } }\n");
    source
}

// ---
// Lexer Benchmarks
// ---

fn bench_lexer(c: &mut Criterion) {
    c.bench_function("lexer/fibonacci", |b| {
        b.iter(|| {
            let tokens: Vec<_> = Lexer::new(black_box(FIBONACCI), 0).collect();
            black_box(tokens)
        })
    });

    let mut group = c.benchmark_group("lexer/size");
    for size in [10, 100, 1000] {
        let source = "int x = 1 + 2 * 3 - 4 / 5;\n".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, src| {
            b.iter(|| {
                let tokens: Vec<_> = Lexer::new(black_box(src), 0).collect();
                black_box(tokens)
            })
        });
    }
    group.finish();
}

// ---
// Parser Benchmarks
// ---

fn bench_parser(c: &mut Criterion) {
    c.bench_function("parser/patterns", |b| {
        b.iter(|| {
            let mut parser = Parser::new(black_box(PATTERNS), 0);
            black_box(parser.parse_compilation_unit())
        })
    });
}

// ---
// Compiler Benchmarks
// ---

fn bench_compiler(c: &mut Criterion) {
    let sources = [SourceFile::new("patterns.sb", PATTERNS)];
    c.bench_function("compiler/patterns/debug", |b| {
        let options = CompilationOptions::default();
        b.iter(|| black_box(compile(black_box(&sources), &options)))
    });
    c.bench_function("compiler/patterns/release", |b| {
        let options = CompilationOptions::release();
        b.iter(|| black_box(compile(black_box(&sources), &options)))
    });

    let mut group = c.benchmark_group("compiler/types");
    group.sample_size(20);
    let sources = [SourceFile::new("types.sb", many_types(64))];
    for (name, options) in [
        ("sequential", CompilationOptions::default().with_concurrent_build(false)),
        ("concurrent", CompilationOptions::default()),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &options, |b, options| {
            b.iter(|| black_box(compile(black_box(&sources), options)))
        });
    }
    group.finish();
}

// ---
// VM Benchmarks
// ---

fn bench_vm(c: &mut Criterion) {
    for (name, source) in [("fibonacci", FIBONACCI), ("patterns", PATTERNS)] {
        let compilation = compile(&[SourceFile::new("bench.sb", source)], &CompilationOptions::release())
            .expect("compiler failed");
        let module = compilation.module.expect("benchmark program has errors");
        c.bench_function(&format!("vm/{}", name), |b| {
            b.iter(|| black_box(run_module(&module, VmOptions::default())))
        });
    }
}

criterion_group!(benches, bench_lexer, bench_parser, bench_compiler, bench_vm);
criterion_main!(benches);
