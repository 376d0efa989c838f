use datatest_stable::Utf8Path;
use imp::{CompilerOptions, EvalError, Jit, Reader};

#[derive(thiserror::Error, Debug)]
#[error("evaluation datatest failed at {0}")]
pub struct DatatestError(Box<Utf8Path>);

struct DatatestFile<'a> {
    comments: Vec<&'a str>,
    expected: Vec<&'a str>,
    source: String,
}

// Files hold the expected output, one line per form, then `---`, then the
// source. `;` lines above the separator are comments and survive a rewrite.
fn read_datatest(contents: &str) -> DatatestFile<'_> {
    let mut comments = vec![];
    let mut expected = vec![];
    let mut source = String::new();
    let mut in_source = false;

    for line in contents.lines() {
        if in_source {
            if !source.is_empty() {
                source.push('\n');
            }
            source.push_str(line);
        } else if line.trim_end() == "---" {
            in_source = true;
        } else if line.trim_start().starts_with(';') {
            comments.push(line);
        } else {
            expected.push(line);
        }
    }

    DatatestFile {
        comments,
        expected,
        source,
    }
}

// from https://matklad.github.io/2021/05/31/how-to-test.html
// DATATEST_EXPECT rewrites the expected section instead of failing.
fn stitch_to_datatest(comments: &[&str], output: &[String], source: &str) -> String {
    let mut lines = comments.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    lines.extend(output.iter().cloned());
    lines.push("---".to_string());
    lines.push(source.to_string());
    lines.join("\n") + "\n"
}

// Evaluates every form, each with a fresh fault state. A read error ends the
// run since the reader cannot resynchronize.
fn evaluate(source: &str) -> Vec<String> {
    let mut jit = match Jit::new(CompilerOptions::default()) {
        Ok(jit) => jit,
        Err(err) => return vec![format!("error: {err}")],
    };
    let mut output = vec![];
    for form in Reader::new(source) {
        match form.map_err(EvalError::from).and_then(|form| jit.eval(&form)) {
            Ok(value) => output.push(value.to_string()),
            Err(err @ EvalError::Read(_)) => {
                output.push(format!("error: {err}"));
                break;
            }
            Err(err) => output.push(format!("error: {err}")),
        }
    }
    output
}

fn eval_test(path: &Utf8Path, contents: String) -> datatest_stable::Result<()> {
    let DatatestFile {
        comments,
        expected,
        source,
    } = read_datatest(&contents);
    let output = evaluate(&source);

    if std::env::var("DATATEST_EXPECT").is_ok() {
        std::fs::write(path, stitch_to_datatest(&comments, &output, &source))?;
        return Ok(());
    }

    let mismatches = (0..expected.len().max(output.len()))
        .filter_map(|i| {
            let want = expected.get(i).map(|l| l.trim());
            let got = output.get(i).map(String::as_str);
            (want != got).then_some((i, got, want))
        })
        .collect::<Vec<_>>();

    if mismatches.is_empty() {
        Ok(())
    } else {
        println!("Evaluation test {path} failed:\n  got -> expected");
        for (i, got, want) in mismatches {
            println!(
                "  [{i}] {} -> {}",
                got.unwrap_or("<not present>"),
                want.unwrap_or("<not present>")
            );
        }
        Err(DatatestError(Box::from(path)))?
    }
}

datatest_stable::harness! {
    eval_test, "test_data", r"^.*\.impd",
}
