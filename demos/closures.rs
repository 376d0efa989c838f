//! Compiles a few closures and shows what was produced for each.
use imp::{CompilerOptions, Jit, Value};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut jit = Jit::new(CompilerOptions {
        dump_ir: true,
        optimize: false,
    })?;

    for src in [
        "(let (x 3) ((fn (y) (+ x y)) 4))",
        "(let (x 1) (let (f (fn (y) (+ x y))) (let (x 99) (f 2))))",
        "(((fn (a) (fn (b) (+ a b))) 10) 5)",
    ] {
        let form = imp::read(src)?;
        let compilation = jit.compile(&form)?;
        println!("{src}");
        for function in compilation.functions() {
            let captures = function
                .captures
                .iter()
                .map(|sym| sym.as_str())
                .collect::<Vec<_>>();
            println!(
                "  fn @ {:p}, arity {}, captures {captures:?}",
                function.entrypoint, function.arity
            );
            if let Some(ir) = &function.ir {
                println!("{ir}");
            }
        }
        println!("  => {}", compilation.run()?);
    }

    // closures can be called from Rust too
    let scale = jit.eval_str("(let (k 3) (fn (x) (* x k)))")?;
    if let Some(scale) = scale.as_function() {
        let result = scale.apply(&[Value::fixnum(14).ok_or("out of range")?])?;
        if let Some(n) = result.as_fixnum() {
            println!("(scale 14) => {n}");
        }
    }

    Ok(())
}
