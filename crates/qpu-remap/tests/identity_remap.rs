//! End-to-end remaps through the emulator, compared pixel by pixel.

use qpu_remap::emu::{EmulatorOptions, Scene, Yuv420Frame, YuyvFrame};
use qpu_remap::launch::Filter;
use qpu_remap::map::{DisplacementMap, MapHeader};
use qpu_remap::{build_kernel, KernelConfig};

fn source(width: u32, height: u32) -> YuyvFrame {
    YuyvFrame::from_fn(width, height, |x, y| {
        [
            (x * 3 + y * 17) as u8,
            (x / 2 * 5 + y * 3 + 40) as u8,
            (200 + x / 2 * 7 + y) as u8,
        ]
    })
}

fn remap(map: &DisplacementMap, src: &YuyvFrame, filter: Filter) -> Yuv420Frame {
    let scene = Scene::new(map, src, filter).unwrap_or_else(|e| panic!("{e}"));
    let program =
        build_kernel(&KernelConfig::with_threads(map.threads())).unwrap_or_else(|e| panic!("{e}"));
    let (_, frame) = scene
        .run(program.words(), EmulatorOptions::default())
        .unwrap_or_else(|e| panic!("{e}"));
    frame
}

/// Expected output for a map sampling source pixel `at(x, y)` at every
/// output pixel: luma per pixel, chroma from the even pixel of even rows.
fn expected(
    src: &YuyvFrame,
    width: u32,
    height: u32,
    at: impl Fn(u32, u32) -> (u32, u32),
) -> Yuv420Frame {
    let px = |x, y| {
        let (sx, sy) = at(x, y);
        src.pixel(sx, sy).unwrap_or_else(|| panic!("no source pixel at {sx},{sy}"))
    };
    let y = (0..height)
        .flat_map(|j| (0..width).map(move |i| (i, j)))
        .map(|(i, j)| px(i, j)[0])
        .collect();
    let chroma: Vec<[u8; 3]> = (0..height / 2)
        .flat_map(|j| (0..width / 2).map(move |i| (2 * i, 2 * j)))
        .map(|(i, j)| px(i, j))
        .collect();
    Yuv420Frame {
        width,
        height,
        y,
        u: chroma.iter().map(|p| p[1]).collect(),
        v: chroma.iter().map(|p| p[2]).collect(),
    }
}

fn assert_frames_eq(got: &Yuv420Frame, want: &Yuv420Frame) {
    for (plane, g, w) in [("Y", &got.y, &want.y), ("U", &got.u, &want.u), ("V", &got.v, &want.v)] {
        assert_eq!(g.len(), w.len(), "{plane} plane size");
        if let Some(i) = g.iter().zip(w.iter()).position(|(a, b)| a != b) {
            panic!("{plane} plane differs at byte {i}: got {}, want {}", g[i], w[i]);
        }
    }
}

#[test]
fn identity_reproduces_the_source_twelve_threads() {
    let (w, h) = (256, 24);
    let src = source(w, h);
    let map = DisplacementMap::identity(MapHeader::same_size(w, h), 12).unwrap_or_else(|e| panic!("{e}"));
    let got = remap(&map, &src, Filter::Nearest);
    assert_frames_eq(&got, &expected(&src, w, h, |x, y| (x, y)));
}

#[test]
fn identity_reproduces_the_source_two_threads() {
    let (w, h) = (128, 8);
    let src = source(w, h);
    let map = DisplacementMap::identity(MapHeader::same_size(w, h), 2).unwrap_or_else(|e| panic!("{e}"));
    let got = remap(&map, &src, Filter::Nearest);
    assert_frames_eq(&got, &expected(&src, w, h, |x, y| (x, y)));
}

#[test]
fn horizontal_flip_mirrors_luma_and_chroma() {
    let (w, h) = (128, 4);
    let src = source(w, h);
    let map = DisplacementMap::horizontal_flip(MapHeader::same_size(w, h), 4)
        .unwrap_or_else(|e| panic!("{e}"));
    let got = remap(&map, &src, Filter::Nearest);
    assert_frames_eq(&got, &expected(&src, w, h, |x, y| (w - 1 - x, y)));
}

#[test]
fn vertical_shift_samples_lower_rows() {
    let (w, h) = (128, 8);
    let src = source(w, h);
    let header = MapHeader::same_size(w, h);
    let map = DisplacementMap::from_positions(header, 4, |x, y| (x as f32, ((y + 2) % h as usize) as f32))
        .unwrap_or_else(|e| panic!("{e}"));
    let got = remap(&map, &src, Filter::Nearest);
    assert_frames_eq(&got, &expected(&src, w, h, |x, y| (x, (y + 2) % h)));
}

#[test]
fn smaller_output_reads_from_a_wider_source() {
    // 160-pixel source in a 256-texel-pitch buffer, 128-pixel output window
    let src = source(160, 4);
    let header = MapHeader {
        map_width: 128,
        map_height: 4,
        image_width: 160,
        image_height: 4,
    };
    let map = DisplacementMap::from_positions(header, 2, |x, y| ((x + 20) as f32, y as f32))
        .unwrap_or_else(|e| panic!("{e}"));
    let got = remap(&map, &src, Filter::Nearest);
    assert_frames_eq(&got, &expected(&src, 128, 4, |x, y| (x + 20, y)));
}

#[test]
fn bilinear_identity_stays_within_one_level() {
    let (w, h) = (128, 4);
    // smooth ramps keep neighbouring texels close
    let src = YuyvFrame::from_fn(w, h, |x, y| [x as u8, 100 + y as u8, 50 + (x / 4) as u8]);
    let map = DisplacementMap::identity(MapHeader::same_size(w, h), 2).unwrap_or_else(|e| panic!("{e}"));
    let got = remap(&map, &src, Filter::Bilinear);
    let want = expected(&src, w, h, |x, y| (x, y));
    for (plane, g, wv) in [("Y", &got.y, &want.y), ("U", &got.u, &want.u), ("V", &got.v, &want.v)] {
        for (i, (a, b)) in g.iter().zip(wv.iter()).enumerate() {
            assert!(a.abs_diff(*b) <= 1, "{plane} byte {i}: got {a}, want {b}");
        }
    }
}
