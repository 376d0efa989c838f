use std::{io::Read, process::ExitCode};

use clap::Parser;
use codesnake::{Block, CodeWidth, Label, LineIndex};
use imp::{
    lexer::{LexerError, Span, Token},
    CompilerOptions, EvalError, Jit, Reader,
};
use yansi::Paint;

/// Compile and run imp forms.
///
/// Without flags, reads one form from stdin and prints its value.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Evaluate forms interactively
    #[arg(long)]
    repl: bool,
    /// Show the tokens of the input instead of evaluating it
    #[arg(long)]
    tokens: bool,
    /// Log the IR of every compiled function
    #[arg(long)]
    dump_ir: bool,
    /// Optimize generated code
    #[arg(long)]
    optimize: bool,
}

fn token_block<'a>(
    idx: &'a LineIndex,
    labels: impl IntoIterator<Item = (Span, Result<Token, LexerError>)>,
) -> Option<Block<&'a str, String>> {
    Block::new(
        idx,
        labels.into_iter().map(|(range, tok)| {
            let text = match &tok {
                Ok(tok) => format!("{tok:?}"),
                Err(err) => err.to_string(),
            };
            Label::new(range)
                .with_text(if tok.is_ok() {
                    text.green().to_string()
                } else {
                    text.red().to_string()
                })
                .with_style(move |s| match tok {
                    Ok(Token::Identifier(_)) => s.blue().to_string(),
                    Ok(Token::Character(_)) => s.yellow().to_string(),
                    Ok(Token::Fixnum(_)) => s.cyan().to_string(),
                    Ok(_) => s,
                    Err(_) => s.red().to_string(),
                })
        }),
    )
}

fn print_tokens(src: &str, name: &str) {
    let idx = LineIndex::new(src);

    let mut blocks = vec![];
    let mut line_labels = vec![];
    for (token, span) in Token::lexer(src).spanned() {
        match token {
            Ok(Token::LineEnding) => blocks.push(token_block(&idx, line_labels.drain(..))),
            // nothing worth labelling
            Ok(Token::IntralineWhitespace) => {}
            tok => line_labels.push((span, tok)),
        }
    }

    if !line_labels.is_empty() {
        blocks.push(token_block(&idx, line_labels.drain(..)));
    }

    for block in blocks
        .into_iter()
        .filter_map(|blk| Some(blk?.map_code(|c| CodeWidth::new(c, c.len()))))
    {
        println!("{}[{name}]", block.prologue());
        print!("{block}");
        println!("{}", block.epilogue());
    }
}

// Labels need at least one character to point at, so an error at the very end
// of the input points at the last character instead.
fn label_span(src: &str, span: Span) -> Span {
    if !span.is_empty() {
        return span;
    }
    match src[..span.start].chars().next_back() {
        Some(c) => span.start - c.len_utf8()..span.start,
        None => span,
    }
}

fn report(src: &str, name: &str, error: &EvalError) {
    eprintln!("{} {error}", "error:".red().bold());

    let EvalError::Read(read_error) = error else {
        return;
    };
    let idx = LineIndex::new(src);
    let label = Label::new(label_span(src, read_error.span()))
        .with_text(read_error.to_string().red().to_string())
        .with_style(|s| s.red().to_string());
    if let Some(block) = Block::new(&idx, [label]) {
        let block = block.map_code(|c| CodeWidth::new(c, c.len()));
        eprintln!("{}[{name}]", block.prologue());
        eprint!("{block}");
        eprintln!("{}", block.epilogue());
    }
}

fn eval_all(jit: &mut Jit, src: &str, name: &str) -> bool {
    for form in Reader::new(src) {
        match form.map_err(EvalError::from).and_then(|form| jit.eval(&form)) {
            Ok(value) => println!("{value}"),
            Err(err) => {
                report(src, name, &err);
                return false;
            }
        }
    }
    true
}

fn repl(jit: &mut Jit, tokens: bool) -> anyhow::Result<()> {
    let mut readline = rustyline::DefaultEditor::new()?;

    while let Ok(input) = readline.readline(">> ") {
        readline.add_history_entry(input.as_str())?;
        if tokens {
            print_tokens(&input, "repl");
        } else {
            eval_all(jit, &input, "repl");
        }
    }

    Ok(())
}

fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let mut jit = Jit::new(CompilerOptions {
        dump_ir: args.dump_ir,
        optimize: args.optimize,
    })?;

    if args.repl {
        repl(&mut jit, args.tokens)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut src = String::new();
    std::io::stdin().read_to_string(&mut src)?;
    if args.tokens {
        print_tokens(&src, "stdin");
        return Ok(ExitCode::SUCCESS);
    }

    let result = Reader::new(&src)
        .read_one()
        .map_err(EvalError::from)
        .and_then(|form| jit.eval(&form));
    match result {
        Ok(value) => {
            println!("{value}");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            report(&src, "stdin", &err);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut logger = env_logger::Builder::new();
    logger.filter_level(log::LevelFilter::Warn);
    if args.dump_ir {
        logger.filter_module("imp", log::LevelFilter::Info);
    }
    logger.parse_default_env().init();

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
