//! Built-in library methods implemented natively.

use sable_symbols::{stable_string_hash, Intrinsic, SymbolLookup};

use crate::error::{invalid, RuntimeError, Unwind};
use crate::executor::{TaskRef, TaskStatus};
use crate::numeric;
use crate::value::Value;
use crate::vm::{Vm, NULL_REFERENCE};

fn arg(args: &[Value], index: usize) -> Result<&Value, Unwind> {
    args.get(index)
        .ok_or_else(|| invalid(format!("intrinsic expects argument {}", index)))
}

fn float_arg(args: &[Value], index: usize) -> Result<f64, Unwind> {
    let value = arg(args, index)?;
    numeric::as_f64(value).ok_or_else(|| invalid(format!("expected a number, found {:?}", value)))
}

/// `Math.Max`/`Math.Min` on doubles propagate NaN.
fn pick(a: f64, b: f64, max: bool) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if max {
        a.max(b)
    } else {
        a.min(b)
    }
}

/// Hash of the default `GetHashCode`: contents for primitives and strings,
/// identity for objects.
fn default_hash(value: &Value) -> i32 {
    let fold = |bits: u64| (bits ^ (bits >> 32)) as i32;
    match value {
        Value::Null => 0,
        Value::Bool(b) => *b as i32,
        Value::Char(c) => *c as i32,
        Value::I8(v) => *v as i32,
        Value::U8(v) => *v as i32,
        Value::I16(v) => *v as i32,
        Value::U16(v) => *v as i32,
        Value::I32(v) | Value::Enum(_, v) => *v,
        Value::U32(v) => *v as i32,
        Value::I64(v) => fold(*v as u64),
        Value::U64(v) => fold(*v),
        Value::F32(v) => v.to_bits() as i32,
        Value::F64(v) | Value::Decimal(v) => fold(v.to_bits()),
        Value::Str(s) => stable_string_hash(s),
        Value::Object(object) => object.id as i32,
        Value::Delegate(delegate) => delegate.method.0 as i32,
        Value::Task(task) => task.borrow().id as i32,
        Value::Ref(_) | Value::MethodPtr(_) => 0,
    }
}

impl<'m> Vm<'m> {
    pub(crate) fn intrinsic(&mut self, intrinsic: Intrinsic, args: Vec<Value>) -> Result<Value, Unwind> {
        let args = args.as_slice();
        Ok(match intrinsic {
            Intrinsic::ObjectCtor => Value::Null,
            Intrinsic::ObjectToString => {
                let text = self.default_to_string(arg(args, 0)?);
                Value::string(&text)
            }
            Intrinsic::ObjectEquals => Value::Bool(arg(args, 0)? == arg(args, 1)?),
            Intrinsic::ObjectGetHashCode => Value::I32(default_hash(arg(args, 0)?)),

            Intrinsic::StringLength => match arg(args, 0)? {
                Value::Str(s) => Value::I32(s.encode_utf16().count() as i32),
                Value::Null => return Err(self.exception(NULL_REFERENCE)),
                other => return Err(invalid(format!("Length of {:?}", other))),
            },
            Intrinsic::StringConcat => {
                let mut text = self.format_value(arg(args, 0)?)?;
                text.push_str(&self.format_value(arg(args, 1)?)?);
                Value::string(&text)
            }

            Intrinsic::ConsoleWriteLine | Intrinsic::ConsoleWrite => {
                let mut text = match args.first() {
                    Some(value) => self.format_value(value)?,
                    None => String::new(),
                };
                if intrinsic == Intrinsic::ConsoleWriteLine {
                    text.push('\n');
                }
                self.write(&text);
                Value::Null
            }

            Intrinsic::MathSqrt => Value::F64(float_arg(args, 0)?.sqrt()),
            Intrinsic::MathAtan2 => Value::F64(float_arg(args, 0)?.atan2(float_arg(args, 1)?)),
            Intrinsic::MathPow => Value::F64(float_arg(args, 0)?.powf(float_arg(args, 1)?)),
            Intrinsic::MathAbs => match arg(args, 0)? {
                Value::I32(v) => Value::I32(v.wrapping_abs()),
                _ => Value::F64(float_arg(args, 0)?.abs()),
            },
            Intrinsic::MathMax | Intrinsic::MathMin => {
                let max = intrinsic == Intrinsic::MathMax;
                match (arg(args, 0)?, arg(args, 1)?) {
                    (Value::I32(a), Value::I32(b)) => Value::I32(if max { *a.max(b) } else { *a.min(b) }),
                    _ => Value::F64(pick(float_arg(args, 0)?, float_arg(args, 1)?, max)),
                }
            }

            Intrinsic::ExceptionCtor => {
                if let (Value::Object(object), Some(message)) = (arg(args, 0)?, args.get(1)) {
                    if let Some(field) = self.known.exception_message {
                        object.set(field, message.clone());
                    }
                }
                Value::Null
            }
            Intrinsic::ExceptionMessage => {
                let this = arg(args, 0)?;
                if this.is_null() {
                    return Err(self.exception(NULL_REFERENCE));
                }
                Value::string(&self.exception_message(this))
            }

            Intrinsic::ComparerEquals => Value::Bool(self.equality(arg(args, 0)?, arg(args, 1)?)?),
            Intrinsic::ComparerGetHashCode => Value::I32(self.hash(arg(args, 0)?)?),

            Intrinsic::TaskFromResult => Value::Task(self.executor.completed(arg(args, 0)?.clone())),
            Intrinsic::TaskYield => Value::Task(self.executor.yielded()),
            Intrinsic::TaskCompleted => Value::Task(self.executor.completed(Value::Null)),
            Intrinsic::TaskCreate => Value::Task(self.executor.pending()),
            Intrinsic::TaskIsCompleted => {
                let task = self.task_arg(arg(args, 0)?)?;
                let pending = task.borrow().is_pending();
                Value::Bool(!pending)
            }
            Intrinsic::TaskResult | Intrinsic::TaskGetResult => {
                let task = self.task_arg(arg(args, 0)?)?;
                self.wait(&task)?;
                let status = task.borrow().status.clone();
                match status {
                    TaskStatus::Completed(value) => value,
                    TaskStatus::Faulted(exception) => return Err(Unwind::Throw(exception)),
                    TaskStatus::Pending => unreachable!("waited task is still pending"),
                }
            }
            Intrinsic::TaskSetResult => {
                let task = self.task_arg(arg(args, 0)?)?;
                self.executor.settle(&task, TaskStatus::Completed(arg(args, 1)?.clone()));
                Value::Null
            }
            Intrinsic::TaskSetException => {
                let task = self.task_arg(arg(args, 0)?)?;
                self.executor.settle(&task, TaskStatus::Faulted(arg(args, 1)?.clone()));
                Value::Null
            }
            Intrinsic::TaskOnCompleted => {
                let task = self.task_arg(arg(args, 0)?)?;
                self.executor.on_completed(&task, arg(args, 1)?.clone());
                Value::Null
            }
        })
    }

    fn task_arg(&self, value: &Value) -> Result<TaskRef, Unwind> {
        match value {
            Value::Task(task) => Ok(task.clone()),
            Value::Null => Err(self.exception(NULL_REFERENCE)),
            other => Err(invalid(format!("expected a task, found {:?}", other))),
        }
    }

    /// Run queued jobs until `task` has completed.
    fn wait(&mut self, task: &TaskRef) -> Result<(), Unwind> {
        while task.borrow().is_pending() {
            match self.executor.next_job() {
                Some(job) => self.run_job(job)?,
                None => return Err(RuntimeError::Deadlock.into()),
            }
        }
        Ok(())
    }

    /// `EqualityComparer.Equals`: nulls compare directly, anything else
    /// through the virtual `Equals`.
    fn equality(&mut self, a: &Value, b: &Value) -> Result<bool, Unwind> {
        match (a, b) {
            (Value::Null, Value::Null) => Ok(true),
            (Value::Null, _) | (_, Value::Null) => Ok(false),
            _ => match self.known.equals {
                Some(equals) => Ok(self.call_virtual(equals, vec![a.clone(), b.clone()])?.is_truthy()),
                None => Ok(a == b),
            },
        }
    }

    fn hash(&mut self, value: &Value) -> Result<i32, Unwind> {
        if value.is_null() {
            return Ok(0);
        }
        match self.known.get_hash_code {
            Some(get_hash_code) => match self.call_virtual(get_hash_code, vec![value.clone()])? {
                Value::I32(hash) => Ok(hash),
                other => Err(invalid(format!("GetHashCode returned {:?}", other))),
            },
            None => Ok(default_hash(value)),
        }
    }

    /// Text of `value` as `Console.WriteLine` and string concatenation
    /// produce it; objects go through their `ToString` override.
    pub(crate) fn format_value(&mut self, value: &Value) -> Result<String, Unwind> {
        match (value, self.known.to_string) {
            (Value::Object(_), Some(to_string)) => match self.call_virtual(to_string, vec![value.clone()])? {
                Value::Str(text) => Ok(text.to_string()),
                other => Ok(self.default_to_string(&other)),
            },
            _ => Ok(self.default_to_string(value)),
        }
    }

    /// `object.ToString()` before any override.
    fn default_to_string(&self, value: &Value) -> String {
        let symbols = self.symbols();
        match value {
            Value::Object(object) => symbols.runtime_class_name(object.class),
            Value::Enum(class, v) => symbols
                .class(*class)
                .fields
                .iter()
                .map(|&f| symbols.field(f))
                .find(|field| {
                    field.is_const && field.constant.as_ref().and_then(|c| c.as_i64()) == Some(*v as i64)
                })
                .map_or_else(|| v.to_string(), |field| field.name.to_string()),
            Value::Delegate(_) | Value::Task(_) | Value::Ref(_) | Value::MethodPtr(_) => value.type_name(symbols),
            other => other.format_primitive().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{run_module, VmOptions};
    use sable_compiler::{compile, CompilationOptions, SourceFile};

    fn output(source: &str) -> String {
        let compilation = compile(&[SourceFile::new("test.sb", source)], &CompilationOptions::default()).unwrap();
        let module = compilation
            .module
            .unwrap_or_else(|| panic!("{:?}", compilation.diagnostics));
        let execution = run_module(&module, VmOptions::default());
        if let Err(error) = &execution.result {
            panic!("{}", error);
        }
        execution.output
    }

    #[test]
    fn test_default_hash() {
        assert_eq!(default_hash(&Value::I32(-5)), -5);
        assert_eq!(default_hash(&Value::Null), 0);
        assert_eq!(default_hash(&Value::string("abc")), stable_string_hash("abc"));
        assert_eq!(default_hash(&Value::I64(1 << 32)), 1);
    }

    #[test]
    fn test_math() {
        let source = r#"
            using System;
            class Program {
                static void Main() {
                    Console.WriteLine(Math.Sqrt(16.0));
                    Console.WriteLine(Math.Max(3, 9));
                    Console.WriteLine(Math.Min(-1.5, 2.0));
                    Console.WriteLine(Math.Abs(-7));
                    Console.WriteLine(Math.Pow(2.0, 10.0));
                }
            }
        "#;
        assert_eq!(output(source), "4\n9\n-1.5\n7\n1024\n");
    }

    #[test]
    fn test_write_and_string_length() {
        let source = r#"
            using System;
            class Program {
                static void Main() {
                    Console.Write("ab");
                    Console.Write(3);
                    Console.WriteLine();
                    Console.WriteLine("hello".Length);
                }
            }
        "#;
        assert_eq!(output(source), "ab3\n5\n");
    }

    #[test]
    fn test_enum_formatting() {
        let source = r#"
            using System;
            enum Color { Red, Green = 5, Blue }
            class Program {
                static void Main() {
                    Color c = Color.Blue;
                    Console.WriteLine(c);
                    Console.WriteLine("is " + Color.Green);
                    Console.WriteLine((int)c);
                }
            }
        "#;
        assert_eq!(output(source), "Blue\nis Green\n6\n");
    }

    #[test]
    fn test_exception_messages() {
        let source = r#"
            using System;
            class Program {
                static void Main() {
                    try { throw new Exception(); }
                    catch (Exception e) { Console.WriteLine(e.Message); }
                    try { throw new Exception("custom"); }
                    catch (Exception e) { Console.WriteLine(e.Message); }
                }
            }
        "#;
        assert_eq!(
            output(source),
            "Exception of type 'System.Exception' was thrown.\ncustom\n"
        );
    }

    #[test]
    fn test_record_equality_goes_through_comparer() {
        let source = r#"
            using System;
            record Point(int X, string Name);
            class Program {
                static void Main() {
                    var a = new Point(1, "a");
                    var b = new Point(1, "a");
                    var c = new Point(2, null);
                    Console.WriteLine(a.Equals(b));
                    Console.WriteLine(a.Equals(c));
                    Console.WriteLine(a.GetHashCode() == b.GetHashCode());
                    Console.WriteLine(c.Equals(new Point(2, null)));
                }
            }
        "#;
        assert_eq!(output(source), "True\nFalse\nTrue\nTrue\n");
    }

    #[test]
    fn test_await_resumes_from_run_queue() {
        let source = r#"
            using System;
            using System.Threading.Tasks;
            class Program {
                static async Task<int> Twice(int x) {
                    await Task.Yield();
                    return x * 2;
                }
                static async Task Run() {
                    Console.WriteLine("start");
                    int v = await Twice(21);
                    Console.WriteLine(v);
                }
                static void Main() {
                    Task t = Run();
                    Console.WriteLine("main");
                }
            }
        "#;
        assert_eq!(output(source), "start\nmain\n42\n");
    }

    #[test]
    fn test_task_result_drains_pending_work() {
        let source = r#"
            using System;
            using System.Threading.Tasks;
            class Program {
                static async Task<int> Slow() {
                    await Task.Yield();
                    return 7;
                }
                static void Main() {
                    Task<int> t = Slow();
                    Console.WriteLine(t.IsCompleted);
                    Console.WriteLine(t.Result);
                    Console.WriteLine(t.IsCompleted);
                    Console.WriteLine(Task.FromResult(3).Result);
                }
            }
        "#;
        assert_eq!(output(source), "False\n7\nTrue\n3\n");
    }

    #[test]
    fn test_faulted_task_rethrows_on_result() {
        let source = r#"
            using System;
            using System.Threading.Tasks;
            class Program {
                static async Task<int> Fails() {
                    await Task.Yield();
                    throw new Exception("boom");
                }
                static void Main() {
                    try {
                        Console.WriteLine(Fails().Result);
                    } catch (Exception e) {
                        Console.WriteLine(e.Message);
                    }
                }
            }
        "#;
        assert_eq!(output(source), "boom\n");
    }
}
