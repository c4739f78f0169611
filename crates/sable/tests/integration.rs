use sable::compiler::{compile, CompilationOptions, CompiledModule, OutputKind, SourceFile};
use sable::symbols::ErrorCode;
use sable::vm::{run_module, RuntimeError, VmOptions};
use sable::{run_source, DriverError};

/// Compile and run a program, returning its console output.
fn run_with(source: &str, options: &CompilationOptions) -> Result<String, String> {
    let execution = run_source(source, options, VmOptions::default()).map_err(|e| match e {
        DriverError::Diagnostics(diagnostics) => format!("Compile errors: {:?}", diagnostics),
        other => format!("Driver error: {}", other),
    })?;
    match execution.result {
        Ok(_) => Ok(execution.output),
        Err(e) => Err(format!("Runtime error: {}\noutput:\n{}", e, execution.output)),
    }
}

fn run(source: &str) -> Result<String, String> {
    run_with(source, &CompilationOptions::default())
}

fn module(sources: &[SourceFile], options: &CompilationOptions) -> CompiledModule {
    let compilation = compile(sources, options).unwrap();
    match compilation.module {
        Some(module) => module,
        None => panic!("compilation failed: {:?}", compilation.diagnostics),
    }
}

fn errors_of(source: &str) -> Vec<ErrorCode> {
    let compilation = compile(&[SourceFile::new("main.sb", source)], &CompilationOptions::default()).unwrap();
    assert!(compilation.module.is_none());
    compilation
        .diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.code)
        .collect()
}

#[test]
fn test_hello_world() {
    let result = run(r#"
        using System;
        class Program {
            static void Main() {
                Console.WriteLine("Hello, world!");
            }
        }
    "#);
    assert_eq!(result.unwrap(), "Hello, world!\n");
}

#[test]
fn test_exit_code() {
    let execution = run_source(
        "class Program { static int Main() { return 40 + 2; } }",
        &CompilationOptions::default(),
        VmOptions::default(),
    )
    .unwrap();
    assert_eq!(execution.exit_code(), Some(42));
}

#[test]
fn test_user_defined_is_operator() {
    let result = run(r#"
        using System;
        class Point {
            public int X;
            public int Y;
            public Point(int x, int y) { X = x; Y = y; }
            public static bool operator is(Point p, out int x, out int y) {
                x = p.X;
                y = p.Y;
                return true;
            }
        }
        class Program {
            static string Describe(object o) {
                if (o is Point(x: 0, y: var y)) {
                    return "on the y axis at " + y;
                }
                if (o is Point(var a, 0)) {
                    return "on the x axis at " + a;
                }
                return "elsewhere";
            }
            static void Main() {
                Console.WriteLine(Describe(new Point(0, 5)));
                Console.WriteLine(Describe(new Point(3, 0)));
                Console.WriteLine(Describe(new Point(1, 1)));
                Console.WriteLine(Describe("text"));
            }
        }
    "#);
    assert_eq!(
        result.unwrap(),
        "on the y axis at 5\non the x axis at 3\nelsewhere\nelsewhere\n"
    );
}

#[test]
fn test_boxed_numeric_constant_pattern() {
    let result = run(r#"
        using System;
        class Program {
            static void Main() {
                short s = 2;
                object boxed = s;
                Console.WriteLine(boxed is 2);
                Console.WriteLine(boxed is 3);
                object text = "2";
                Console.WriteLine(text is 2);
                object nothing = null;
                Console.WriteLine(nothing is null);
                Console.WriteLine(boxed is null);
            }
        }
    "#);
    assert_eq!(result.unwrap(), "True\nFalse\nFalse\nTrue\nFalse\n");
}

#[test]
fn test_property_pattern() {
    let result = run(r#"
        using System;
        class Box {
            public int Width { get; set; }
            public int Height { get; set; }
        }
        class Program {
            static void Main() {
                var box = new Box();
                box.Width = 4;
                box.Height = 4;
                Console.WriteLine(box is Box { Width is 4, Height is 4 });
                Console.WriteLine(box is Box { Width is 4, Height is 5 });
                object o = box;
                if (o is Box { Width is var w }) {
                    Console.WriteLine(w * 10);
                }
            }
        }
    "#);
    assert_eq!(result.unwrap(), "True\nFalse\n40\n");
}

#[test]
fn test_switch_sections_and_guards() {
    let result = run(r#"
        using System;
        class Program {
            static string Classify(object o) {
                switch (o) {
                    case int i when i > 100:
                        return "big int";
                    case int j:
                        return "int " + j;
                    case string s:
                        return "string of " + s.Length;
                    case null:
                        return "null";
                    default:
                        return "something else";
                }
            }
            static void Main() {
                Console.WriteLine(Classify(500));
                Console.WriteLine(Classify(7));
                Console.WriteLine(Classify("abcd"));
                Console.WriteLine(Classify(null));
                Console.WriteLine(Classify(2.5));
            }
        }
    "#);
    assert_eq!(
        result.unwrap(),
        "big int\nint 7\nstring of 4\nnull\nsomething else\n"
    );
}

#[test]
fn test_guards_beside_default_run_in_source_order() {
    let result = run(r#"
        using System;
        class Program {
            static bool Log(string s) {
                Console.Write(s);
                return true;
            }
            static void Main() {
                for (int n = 1; n <= 4; n++) {
                    switch (n) {
                        case 1 when Log("a"):
                            Console.Write("1");
                            break;
                        case 2 when Log("b"):
                        default:
                            Console.Write("d");
                            break;
                        case 3 when Log("c"):
                            Console.Write("3");
                            break;
                    }
                    Console.WriteLine();
                }
            }
        }
    "#);
    assert_eq!(result.unwrap(), "a1
bd
c3
d
");
}

#[test]
fn test_statements_after_break_are_dropped() {
    let result = run(r#"
        using System;
        class Program {
            static void Main() {
                for (int n = 1; n <= 3; n++) {
                    switch (n) {
                        case 1:
                            Console.WriteLine("one");
                            break;
                            Console.WriteLine("never");
                        case 2:
                            Console.WriteLine("two");
                            break;
                        default:
                            Console.WriteLine("other");
                            break;
                    }
                }
            }
        }
    "#);
    assert_eq!(result.unwrap(), "one\ntwo\nother\n");
}

#[test]
fn test_records() {
    let result = run(r#"
        using System;
        record Point(int X, int Y);
        record Person(string Name, int Age);
        class Program {
            static void Main() {
                var a = new Point(1, 2);
                var b = new Point(1, 2);
                Console.WriteLine(a.Equals(b));
                Console.WriteLine(a.Equals(new Point(2, 1)));
                Console.WriteLine(a.GetHashCode() == b.GetHashCode());
                if (a is Point(var x, var y)) {
                    Console.WriteLine(x + y);
                }
                object n = new Person("Ada", 36);
                Console.WriteLine(n is Point(36, 0));
                Console.WriteLine(n is Person("Ada", *));
            }
        }
    "#);
    assert_eq!(result.unwrap(), "True\nFalse\nTrue\n3\nFalse\nTrue\n");
}

#[test]
fn test_class_hierarchy_and_virtual_dispatch() {
    let result = run(r#"
        using System;
        abstract class Shape {
            public abstract double Area();
            public virtual string Name() { return "shape"; }
            public override string ToString() { return Name() + " of area " + Area(); }
        }
        class Square : Shape {
            double side;
            public Square(double side) { this.side = side; }
            public override double Area() { return side * side; }
            public override string Name() { return "square"; }
        }
        class Circle : Shape {
            double r;
            public Circle(double r) { this.r = r; }
            public override double Area() { return 3.0 * r * r; }
        }
        class Program {
            static void Main() {
                Shape a = new Square(2.0);
                Shape b = new Circle(1.0);
                Console.WriteLine(a);
                Console.WriteLine(b);
                Console.WriteLine(a is Square s ? "square side area " + s.Area() : "no");
                Console.WriteLine(b as Square == null);
            }
        }
    "#);
    assert_eq!(
        result.unwrap(),
        "square of area 4\nshape of area 3\nsquare side area 4\nTrue\n"
    );
}

#[test]
fn test_closures_share_captured_variables() {
    let result = run(r#"
        using System;
        class Program {
            static Func<int> Counter() {
                int count = 0;
                return () => {
                    count = count + 1;
                    return count;
                };
            }
            static void Main() {
                var next = Counter();
                next();
                next();
                Console.WriteLine(next());
                int total = 0;
                Action<int> add = x => total = total + x;
                add(5);
                add(7);
                Console.WriteLine(total);
                Func<int, Func<int, int>> adder = a => b => a + b;
                Console.WriteLine(adder(10)(32));
            }
        }
    "#);
    assert_eq!(result.unwrap(), "3\n12\n42\n");
}

#[test]
fn test_iterators_are_lazy() {
    let result = run(r#"
        using System;
        using System.Collections.Generic;
        class Program {
            static IEnumerable<int> Numbers(int limit) {
                for (int i = 0; ; i++) {
                    if (i == limit) {
                        yield break;
                    }
                    Console.WriteLine("produce " + i);
                    yield return i * i;
                }
            }
            static void Main() {
                var numbers = Numbers(3);
                Console.WriteLine("start");
                int sum = 0;
                foreach (var n in numbers) {
                    Console.WriteLine("got " + n);
                    sum += n;
                }
                Console.WriteLine(sum);
            }
        }
    "#);
    assert_eq!(
        result.unwrap(),
        "start\nproduce 0\ngot 0\nproduce 1\ngot 1\nproduce 2\ngot 4\n5\n"
    );
}

#[test]
fn test_async_await_with_handlers() {
    let result = run(r#"
        using System;
        using System.Threading.Tasks;
        class Program {
            static async Task<int> Fetch(int x) {
                await Task.Yield();
                if (x < 0) {
                    throw new Exception("negative");
                }
                return x + 1;
            }
            static async Task<int> Total() {
                int total = 0;
                for (int i = 0; i < 3; i++) {
                    total += await Fetch(i);
                }
                try {
                    total += await Fetch(-1);
                } catch (Exception e) {
                    Console.WriteLine("caught " + e.Message);
                    total += await Fetch(100);
                } finally {
                    Console.WriteLine("finally");
                }
                return total;
            }
            static void Main() {
                Console.WriteLine(Total().Result);
            }
        }
    "#);
    assert_eq!(result.unwrap(), "caught negative\nfinally\n107\n");
}

#[test]
fn test_nullable_and_conditional_access() {
    let result = run(r#"
        using System;
        class Node {
            public Node Next;
            public string Label;
        }
        class Program {
            static void Main() {
                int? a = null;
                int? b = 4;
                Console.WriteLine(a ?? -1);
                Console.WriteLine(b ?? -1);
                Console.WriteLine(a.HasValue);
                Console.WriteLine(b.Value * 2);
                Node node = new Node();
                node.Label = "head";
                Console.WriteLine(node.Next?.Label ?? "end");
                Console.WriteLine(node?.Label);
                string s = null;
                Console.WriteLine(s?.Length == null);
            }
        }
    "#);
    assert_eq!(result.unwrap(), "-1\n4\nFalse\n8\nend\nhead\nTrue\n");
}

#[test]
fn test_numeric_conversions() {
    let result = run(r#"
        using System;
        class Program {
            static void Main() {
                int big = 2147483647;
                Console.WriteLine(big + 1);
                long wide = big;
                Console.WriteLine(wide + 1);
                int wrapped = 300;
                Console.WriteLine((byte)wrapped);
                Console.WriteLine((int)3.99);
                Console.WriteLine(7 / 2.0);
                Console.WriteLine(1u + 2u);
                Console.WriteLine(-7 % 3);
                int shift = 33;
                Console.WriteLine(1 << shift);
                char c = 'a';
                Console.WriteLine((char)(c + 1));
                Console.WriteLine(0.1m + 0.2m);
            }
        }
    "#);
    assert_eq!(
        result.unwrap(),
        "-2147483648\n2147483648\n44\n3\n3.5\n3\n-1\n2\nb\n0.3\n"
    );
}

#[test]
fn test_runtime_faults_are_catchable() {
    let result = run(r#"
        using System;
        class Program {
            static void Main() {
                try {
                    int zero = 0;
                    Console.WriteLine(10 / zero);
                } catch (Exception e) {
                    Console.WriteLine(e.Message);
                }
                try {
                    object o = "text";
                    int i = (int)o;
                } catch (Exception e) {
                    Console.WriteLine(e.Message.Length > 0);
                }
                try {
                    string s = null;
                    Console.WriteLine(s.Length);
                } catch (Exception e) {
                    Console.WriteLine(e.Message);
                }
            }
        }
    "#);
    assert_eq!(
        result.unwrap(),
        "Attempted to divide by zero.\nTrue\nObject reference not set to an instance of an object.\n"
    );
}

#[test]
fn test_unhandled_exception_is_reported() {
    let execution = run_source(
        r#"
        using System;
        class Program {
            static void Main() {
                Console.WriteLine("before");
                throw new Exception("fatal");
            }
        }
        "#,
        &CompilationOptions::default(),
        VmOptions::default(),
    )
    .unwrap();
    assert_eq!(execution.output, "before\n");
    match execution.result {
        Err(RuntimeError::UnhandledException { type_name, message }) => {
            assert_eq!(type_name, "System.Exception");
            assert_eq!(message, "fatal");
        }
        other => panic!("expected an unhandled exception, got {:?}", other),
    }
}

#[test]
fn test_deep_recursion_overflows() {
    let source = r#"
        class Program {
            static int Down(int n) { return Down(n + 1); }
            static void Main() { Down(0); }
        }
    "#;
    let options = VmOptions {
        max_call_depth: 200,
        ..VmOptions::default()
    };
    let execution = run_source(source, &CompilationOptions::default(), options).unwrap();
    assert!(matches!(execution.result, Err(RuntimeError::StackOverflow(200))));
}

#[test]
fn test_multiple_files_and_namespaces() {
    let shapes = SourceFile::new(
        "shapes.sb",
        r#"
        namespace Geometry.Shapes {
            enum Kind { Round, Angular }
            class Unit {
                public static int Count;
                static Unit() { Count = 10; }
                public static Kind KindOf(int corners) => corners == 0 ? Kind.Round : Kind.Angular;
            }
        }
        "#,
    );
    let main = SourceFile::new(
        "main.sb",
        r#"
        using System;
        namespace Geometry.Shapes {
            class Program {
                static void Main() {
                    Console.WriteLine(Unit.Count);
                    Console.WriteLine(Unit.KindOf(0));
                    Console.WriteLine(Geometry.Shapes.Unit.KindOf(4));
                }
            }
        }
        "#,
    );
    let module = module(&[shapes, main], &CompilationOptions::default());
    let execution = run_module(&module, VmOptions::default());
    assert!(execution.result.is_ok(), "{:?}", execution.result);
    assert_eq!(execution.output, "10\nRound\nAngular\n");
}

const MIXED_PROGRAM: &str = r#"
    using System;
    using System.Collections.Generic;
    using System.Threading.Tasks;
    record Pair(int Left, int Right);
    class Evens {
        public static IEnumerable<int> Below(int n) {
            for (int i = 0; i < n; i += 2) {
                yield return i;
            }
        }
    }
    class Program {
        static async Task<int> Double(int x) {
            await Task.Yield();
            return x * 2;
        }
        static string Show(object o) {
            switch (o) {
                case Pair(0, var r): return "zero-left " + r;
                case Pair p: return "pair " + p.Left;
                case int i when i % 2 == 0: return "even";
                default: return "other";
            }
        }
        static void Main() {
            int scale = 3;
            Func<int, int> times = x => x * scale;
            foreach (var e in Evens.Below(7)) {
                Console.WriteLine(times(e));
            }
            Console.WriteLine(Show(new Pair(0, 9)));
            Console.WriteLine(Show(new Pair(1, 9)));
            Console.WriteLine(Show(4));
            Console.WriteLine(Show(5));
            Console.WriteLine(Double(21).Result);
        }
    }
"#;

const MIXED_OUTPUT: &str = "0\n6\n12\n18\nzero-left 9\npair 1\neven\nother\n42\n";

#[test]
fn test_build_modes_agree() {
    let configurations = [
        CompilationOptions::default(),
        CompilationOptions::release(),
        CompilationOptions::default().with_concurrent_build(false),
        CompilationOptions::default().with_worker_threads(4),
        CompilationOptions::default().with_debug_info(false),
    ];
    for options in &configurations {
        assert_eq!(run_with(MIXED_PROGRAM, options).unwrap(), MIXED_OUTPUT, "{:?}", options);
    }
}

#[test]
fn test_concurrent_build_generates_the_same_methods() {
    let sources = [SourceFile::new("main.sb", MIXED_PROGRAM)];
    let sequential = module(&sources, &CompilationOptions::default().with_concurrent_build(false));
    let concurrent = module(&sources, &CompilationOptions::default().with_worker_threads(4));
    let names = |m: &CompiledModule| {
        let mut names: Vec<_> = m.compiled_methods().map(|(id, _)| m.method_name(id)).collect();
        names.sort();
        names
    };
    assert_eq!(names(&sequential), names(&concurrent));
    let main = sequential.find_methods("Program.Main")[0];
    assert_eq!(
        sequential.body(main).map(|b| b.code.len()),
        concurrent.body(concurrent.find_methods("Program.Main")[0]).map(|b| b.code.len())
    );
}

#[test]
fn test_library_needs_no_entry_point() {
    let source = SourceFile::new("lib.sb", "class Util { public static int Twice(int x) => x * 2; }");
    let options = CompilationOptions::default().with_output_kind(OutputKind::Library);
    let library = module(&[source.clone()], &options);
    assert!(library.entry_point.is_none());
    let compilation = compile(&[source], &CompilationOptions::default()).unwrap();
    assert!(compilation.diagnostics.contains(ErrorCode::NoMainMethod));
}

#[test]
fn test_type_errors_block_the_module() {
    let codes = errors_of(r#"
        class Program {
            static void Main() {
                int x = "text";
                Missing();
            }
        }
    "#);
    assert!(codes.contains(&ErrorCode::NoImplicitConv));
    assert!(codes.contains(&ErrorCode::NameNotInContext));
}

#[test]
fn test_pattern_errors() {
    let codes = errors_of(r#"
        class Thing { public int A; }
        class Program {
            static void Main() {
                object o = new Thing();
                bool a = o is Thing(1);
                bool b = o is int(1);
            }
        }
    "#);
    assert!(codes.contains(&ErrorCode::NoSuchMember));

    let codes = errors_of(r#"
        record Pair(int Left, int Right);
        class Program {
            static void Main() {
                object o = new Pair(1, 2);
                bool a = o is Pair(Left: 1, 2);
            }
        }
    "#);
    assert!(codes.contains(&ErrorCode::NamedArgumentSpecificationBeforeFixedArgument));
}

#[test]
fn test_parse_errors_are_reported_with_spans() {
    let compilation = compile(
        &[SourceFile::new("bad.sb", "class Program { static void Main() { int x = ; } }")],
        &CompilationOptions::default(),
    )
    .unwrap();
    let parse_errors: Vec<_> = compilation
        .diagnostics
        .iter()
        .filter(|d| d.code == ErrorCode::ParseError)
        .collect();
    assert!(!parse_errors.is_empty());
    assert!(parse_errors.iter().all(|d| d.span.file_id == 0 && d.span.start > 0));
}
