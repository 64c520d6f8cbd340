//! End-to-end run tests
//!
//! Each test writes a template and a data file to a temp dir, runs the whole
//! pipeline and inspects the files and the summary:
//! - value, property and visibility bindings land on the right nodes
//! - unsafe cell content is stripped but the cell still applies
//! - rows never see each other's values
//! - two runs on the same input make the same decisions
//! - row/cell failures are counted, fatal failures write nothing

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    use crate::config::{Config, ExportFormat};
    use crate::error::{AutogenError, ErrorKind, Result};
    use crate::index::build_index;
    use crate::pipeline::{run, RunInputs};
    use crate::render::{PdfMerger, Renderer, SvgRenderer};
    use crate::summary::RunSummary;
    use crate::template::{Document, ElementNode};
    use crate::transform::{InstructionKind, Skipped};

    const TEMPLATE: &str = r##"<svg width="210mm" height="297mm" viewBox="0 0 210 297">
<g id="layer1" inkscape:label="show_logo" inkscape:groupmode="layer" style="display:inline">
  <image id="logo" xlink:href="logo.png" width="10" height="10"/>
</g>
<text id="text1" inkscape:label="&lt;name&gt;" x="10" y="20"><tspan x="10" y="20">Name here</tspan></text>
<rect id="frame" width="100" height="50" stroke="#000000" style="fill:none"/>
<circle id="dot" r="3" style="fill:red"/>
</svg>"##;

    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new(data: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("template.svg"), TEMPLATE).unwrap();
            fs::write(dir.path().join("data.csv"), data).unwrap();
            Self { dir }
        }

        fn out(&self) -> PathBuf {
            self.dir.path().join("out")
        }

        fn inputs(&self) -> RunInputs {
            self.inputs_into(&self.out())
        }

        fn inputs_into(&self, out: &Path) -> RunInputs {
            RunInputs {
                template: self.dir.path().join("template.svg"),
                data: self.dir.path().join("data.csv"),
                output_dir: out.to_path_buf(),
                dry_run: false,
            }
        }

        fn output_names(&self) -> Vec<String> {
            let Ok(entries) = fs::read_dir(self.out()) else {
                return Vec::new();
            };
            let mut names: Vec<String> = entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn svg_config(pattern: &str) -> Config {
        Config {
            export_format: ExportFormat::Svg,
            filename_pattern: pattern.to_string(),
            ..Config::default()
        }
    }

    fn run_svg(inputs: &RunInputs, config: &Config) -> Result<RunSummary> {
        run(inputs, config, &SvgRenderer, None, Arc::new(AtomicBool::new(false)))
    }

    fn node(document: &Document, label: &str) -> ElementNode {
        let index = build_index(document);
        index.find_nodes(document, label)[0].clone()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BINDINGS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_text_and_property_binding() {
        let ws = Workspace::new("name,frame##stroke\nAda,#00ff00\n");
        let summary = run_svg(&ws.inputs(), &svg_config("{name}")).unwrap();
        assert_eq!(summary.rows_succeeded, 1);

        let original = Document::parse(TEMPLATE).unwrap();
        let output = Document::load(&ws.out().join("Ada.svg")).unwrap();

        assert_eq!(node(&output, "name").text_content(), "Ada");
        assert_eq!(node(&output, "frame").attr("stroke"), Some("#00ff00"));
        assert_eq!(node(&output, "frame").attr("style"), Some("fill:none"));

        // nothing else moved
        for label in ["show_logo", "logo", "dot"] {
            assert_eq!(node(&output, label), node(&original, label), "{} changed", label);
        }
    }

    #[test]
    fn test_visibility_binding_and_invalid_value() {
        let ws = Workspace::new("show_logo\nfalse\nmaybe\n");
        let summary = run_svg(&ws.inputs(), &svg_config("card_{count}")).unwrap();

        assert!(summary.aborted.is_none());
        assert_eq!(summary.rows_succeeded, 2);
        assert_eq!(summary.count(ErrorKind::Validation), 1);
        assert_eq!(summary.rows_for(ErrorKind::Validation), &[2]);

        let hidden = Document::load(&ws.out().join("card_1.svg")).unwrap();
        assert_eq!(node(&hidden, "show_logo").style_value("display").as_deref(), Some("none"));

        let untouched = Document::load(&ws.out().join("card_2.svg")).unwrap();
        assert_eq!(
            node(&untouched, "show_logo").style_value("display").as_deref(),
            Some("inline")
        );
        assert!(matches!(
            &summary.rows[1].cells[0].result,
            Err(Skipped::Rejected { kind: ErrorKind::Validation, .. })
        ));
        assert_eq!(summary.rows[1].cells[0].instruction, InstructionKind::SetVisibility);
    }

    #[test]
    fn test_filenames_follow_row_order() {
        let ws = Workspace::new("name\nAda\nBob\n");
        let summary = run_svg(&ws.inputs(), &svg_config("cert_{name}_{count}")).unwrap();

        assert_eq!(ws.output_names(), vec!["cert_Ada_1.svg", "cert_Bob_2.svg"]);
        let generated: Vec<_> = summary
            .generated
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(generated, vec!["cert_Ada_1.svg", "cert_Bob_2.svg"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SAFETY
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_script_in_cell_is_stripped_and_applied() {
        let ws = Workspace::new("name\n<script>alert(1)</script>Ada\n");
        let summary = run_svg(&ws.inputs(), &svg_config("row_{count}")).unwrap();

        assert_eq!(summary.rows_succeeded, 1);
        assert_eq!(summary.count(ErrorKind::Security), 1);
        assert!(summary.rows[0].cells[0].result.is_ok());

        let written = fs::read_to_string(ws.out().join("row_1.svg")).unwrap();
        assert!(!written.to_ascii_lowercase().contains("<script"));
        let output = Document::parse(&written).unwrap();
        assert_eq!(node(&output, "name").text_content(), "Ada");
    }

    #[test]
    fn test_strict_mode_can_abort_the_run() {
        let ws = Workspace::new("name\nAda\n<script>x</script>\nCy\n");
        let config = Config {
            strict_validation: true,
            skip_on_security: false,
            ..svg_config("row_{count}")
        };
        let summary = run_svg(&ws.inputs(), &config).unwrap();

        assert!(summary.aborted.is_some());
        assert_eq!(summary.rows_for(ErrorKind::Security), &[2]);
        assert_eq!(ws.output_names(), vec!["row_1.svg"]);
    }

    #[test]
    fn test_strict_mode_skips_the_row() {
        let ws = Workspace::new("name\nAda\n<script>x</script>\nCy\n");
        let config = Config {
            strict_validation: true,
            ..svg_config("row_{count}")
        };
        let summary = run_svg(&ws.inputs(), &config).unwrap();

        assert!(summary.aborted.is_none());
        assert_eq!(ws.output_names(), vec!["row_1.svg", "row_3.svg"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ISOLATION AND DETERMINISM
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_rows_are_isolated() {
        let ws = Workspace::new("name,frame##stroke,show_logo\nAda,#111111,no\nBob,,yes\n");
        run_svg(&ws.inputs(), &svg_config("{name}")).unwrap();

        let ada = Document::load(&ws.out().join("Ada.svg")).unwrap();
        let bob = Document::load(&ws.out().join("Bob.svg")).unwrap();

        assert_eq!(node(&ada, "name").text_content(), "Ada");
        assert_eq!(node(&bob, "name").text_content(), "Bob");
        assert_eq!(node(&ada, "frame").attr("stroke"), Some("#111111"));
        // empty cell keeps the template value, not the previous row's
        assert_eq!(node(&bob, "frame").attr("stroke"), Some("#000000"));
        assert_eq!(node(&ada, "show_logo").style_value("display").as_deref(), Some("none"));
        assert_eq!(node(&bob, "show_logo").style_value("display").as_deref(), Some("inline"));
    }

    #[test]
    fn test_two_runs_make_identical_decisions() {
        let ws = Workspace::new("name,frame##stroke,show_logo\nAda,#111111,no\nBob,red,maybe\nAda,blue,yes\n");
        let config = Config {
            overwrite: false,
            collision: Some(crate::config::CollisionPolicy::AutoNumber),
            ..svg_config("{name}")
        };

        let first_dir = ws.dir.path().join("first");
        let second_dir = ws.dir.path().join("second");
        let first = run_svg(&ws.inputs_into(&first_dir), &config).unwrap();
        let second = run_svg(&ws.inputs_into(&second_dir), &config).unwrap();

        let names = |summary: &RunSummary| -> Vec<String> {
            summary
                .generated
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(names(&first), vec!["Ada.svg", "Bob.svg", "Ada_1.svg"]);
        assert_eq!(names(&first), names(&second));

        let cells = |summary: &RunSummary| {
            summary
                .rows
                .iter()
                .map(|r| (r.row, r.count, r.cells.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(cells(&first), cells(&second));
        assert_eq!(first.counts, second.counts);
        assert_eq!(first.template_fingerprint, second.template_fingerprint);

        for name in names(&first) {
            assert_eq!(
                fs::read(first_dir.join(&name)).unwrap(),
                fs::read(second_dir.join(&name)).unwrap()
            );
        }
    }

    #[test]
    fn test_row_range_selects_in_order() {
        let mut data = String::from("name\n");
        for n in 1..=10 {
            data.push_str(&format!("P{}\n", n));
        }
        let ws = Workspace::new(&data);
        let config = Config {
            row_range: Some("1-3,6".to_string()),
            ..svg_config("{name}_{count}")
        };
        let summary = run_svg(&ws.inputs(), &config).unwrap();

        let rows: Vec<(usize, usize)> = summary.rows.iter().map(|r| (r.row, r.count)).collect();
        assert_eq!(rows, vec![(1, 1), (2, 2), (3, 3), (6, 4)]);
        assert_eq!(summary.rows_total, 10);
        assert_eq!(
            ws.output_names(),
            vec!["P1_1.svg", "P2_2.svg", "P3_3.svg", "P6_4.svg"]
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // RUN CONTROL
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_fatal_errors_write_nothing() {
        let ws = Workspace::new("name\nAda\n");
        let err = run_svg(&ws.inputs(), &svg_config("cert_{surname}")).unwrap_err();
        assert!(matches!(err, AutogenError::Configuration(_)));
        assert!(ws.output_names().is_empty());

        let ws = Workspace::new("frame##stroke##width\nred\n");
        let err = run_svg(&ws.inputs(), &svg_config("x")).unwrap_err();
        assert!(matches!(err, AutogenError::Configuration(_)));

        let ws = Workspace::new("name\n");
        let err = run_svg(&ws.inputs(), &svg_config("x")).unwrap_err();
        assert!(matches!(err, AutogenError::DataFormat(_)));
    }

    #[test]
    fn test_unresolved_columns_are_reported_once() {
        let ws = Workspace::new("name,subtitle\nAda,x\nBob,y\n");
        let summary = run_svg(&ws.inputs(), &svg_config("{subtitle}")).unwrap();

        assert_eq!(summary.unresolved_columns, vec!["subtitle"]);
        assert_eq!(summary.count(ErrorKind::ResolutionMiss), 1);
        // still usable in file names
        assert_eq!(ws.output_names(), vec!["x.svg", "y.svg"]);
    }

    #[test]
    fn test_cancelled_before_first_batch() {
        let ws = Workspace::new("name\nAda\n");
        let cancel = Arc::new(AtomicBool::new(true));
        let summary = run(&ws.inputs(), &svg_config("{name}"), &SvgRenderer, None, cancel).unwrap();
        assert!(summary.cancelled);
        assert!(ws.output_names().is_empty());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let ws = Workspace::new("name\nAda\nBob\n");
        let mut inputs = ws.inputs();
        inputs.dry_run = true;
        let summary = run_svg(&inputs, &svg_config("{name}")).unwrap();
        assert_eq!(summary.generated.len(), 2);
        assert!(ws.output_names().is_empty());
    }

    #[test]
    fn test_existing_files_are_skipped() {
        let ws = Workspace::new("name\nAda\nBob\n");
        fs::create_dir_all(ws.out()).unwrap();
        fs::write(ws.out().join("Ada.svg"), "old").unwrap();
        let config = Config {
            overwrite: false,
            ..svg_config("{name}")
        };
        let summary = run_svg(&ws.inputs(), &config).unwrap();

        assert_eq!(summary.skipped_files, vec![ws.out().join("Ada.svg")]);
        assert_eq!(fs::read_to_string(ws.out().join("Ada.svg")).unwrap(), "old");
        assert_eq!(ws.output_names(), vec!["Ada.svg", "Bob.svg"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // RENDER COLLABORATORS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Emits `%PDF <name>` per row, fails for rows named `Bob`.
    struct FakePdfRenderer;

    impl Renderer for FakePdfRenderer {
        fn supports(&self, format: ExportFormat) -> bool {
            format == ExportFormat::Pdf
        }

        fn render(&self, document: &Document, _format: ExportFormat, _dpi: u32) -> Result<Vec<u8>> {
            let name = node(document, "name").text_content();
            if name == "Bob" {
                return Err(AutogenError::render("renderer crashed"));
            }
            Ok(format!("%PDF {}\n", name).into_bytes())
        }
    }

    #[derive(Default)]
    struct ConcatMerger {
        calls: Mutex<usize>,
    }

    impl PdfMerger for ConcatMerger {
        fn merge(&self, pdfs: &[Vec<u8>]) -> Result<Vec<u8>> {
            *self.calls.lock().unwrap() += 1;
            Ok(pdfs.concat())
        }
    }

    fn pdf_config() -> Config {
        Config {
            export_format: ExportFormat::Pdf,
            filename_pattern: "{name}".to_string(),
            render_workers: 2,
            ..Config::default()
        }
    }

    #[test]
    fn test_render_failure_is_row_scoped() {
        let ws = Workspace::new("name\nAda\nBob\nCy\n");
        let summary = run(
            &ws.inputs(),
            &pdf_config(),
            &FakePdfRenderer,
            None,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert_eq!(summary.rows_for(ErrorKind::Render), &[2]);
        assert_eq!(ws.output_names(), vec!["Ada.pdf", "Cy.pdf"]);
    }

    #[test]
    fn test_abort_on_render_failure() {
        let ws = Workspace::new("name\nAda\nBob\nCy\nDee\n");
        let config = Config {
            abort_on_render_failure: true,
            ..pdf_config()
        };
        let summary = run(
            &ws.inputs(),
            &config,
            &FakePdfRenderer,
            None,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert!(summary.aborted.is_some());
        // Ada rendered in the same batch before the failure was seen
        assert_eq!(ws.output_names(), vec!["Ada.pdf"]);
    }

    #[test]
    fn test_merge_outputs() {
        let ws = Workspace::new("name\nAda\nCy\n");
        let config = Config {
            merge_outputs: true,
            ..pdf_config()
        };
        let merger = ConcatMerger::default();
        let summary = run(
            &ws.inputs(),
            &config,
            &FakePdfRenderer,
            Some(&merger),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert_eq!(*merger.calls.lock().unwrap(), 1);
        assert_eq!(summary.merged, Some(ws.out().join("merged.pdf")));
        assert_eq!(
            fs::read_to_string(ws.out().join("merged.pdf")).unwrap(),
            "%PDF Ada\n%PDF Cy\n"
        );
    }

    #[test]
    fn test_merged_parts_are_deleted_on_request() {
        let ws = Workspace::new("name\nAda\nCy\n");
        let config = Config {
            merge_outputs: true,
            delete_individual_pdfs: true,
            ..pdf_config()
        };
        let summary = run(
            &ws.inputs(),
            &config,
            &FakePdfRenderer,
            Some(&ConcatMerger::default()),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert_eq!(ws.output_names(), vec!["merged.pdf"]);
        assert!(summary.generated.is_empty());
        assert_eq!(
            summary.deleted,
            vec![ws.out().join("Ada.pdf"), ws.out().join("Cy.pdf")]
        );
    }

    /// Fails every merge.
    struct BrokenMerger;

    impl PdfMerger for BrokenMerger {
        fn merge(&self, _pdfs: &[Vec<u8>]) -> Result<Vec<u8>> {
            Err(AutogenError::render("merge tool missing"))
        }
    }

    #[test]
    fn test_failed_merge_keeps_individual_pdfs() {
        let ws = Workspace::new("name\nAda\nCy\n");
        let config = Config {
            merge_outputs: true,
            delete_individual_pdfs: true,
            ..pdf_config()
        };
        let summary = run(
            &ws.inputs(),
            &config,
            &FakePdfRenderer,
            Some(&BrokenMerger),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert!(summary.merge_error.is_some());
        assert!(summary.deleted.is_empty());
        assert_eq!(ws.output_names(), vec!["Ada.pdf", "Cy.pdf"]);
    }

    #[test]
    fn test_link_property_resolves_like_an_image() {
        let ws = Workspace::new("logo##xlink:href\nphoto.png\n../../../../etc/shadow\n");
        fs::write(ws.dir.path().join("photo.png"), b"png").unwrap();
        let summary = run_svg(&ws.inputs(), &svg_config("card_{count}")).unwrap();

        assert_eq!(summary.rows_for(ErrorKind::ImageNotFound), &[2]);
        let found = Document::load(&ws.out().join("card_1.svg")).unwrap();
        let href = node(&found, "logo").attr("xlink:href").unwrap().to_string();
        assert!(href.ends_with("photo.png"), "{}", href);
        let kept = Document::load(&ws.out().join("card_2.svg")).unwrap();
        assert_eq!(node(&kept, "logo").attr("xlink:href"), Some("logo.png"));
    }

    #[test]
    fn test_unsupported_format_is_fatal() {
        let ws = Workspace::new("name\nAda\n");
        let config = Config {
            export_format: ExportFormat::Png,
            ..svg_config("{name}")
        };
        let err = run_svg(&ws.inputs(), &config).unwrap_err();
        assert!(matches!(err, AutogenError::Configuration(_)));
    }
}
